use anyhow::{Context, Result};
use crossterm::event::{self, DisableFocusChange, EnableFocusChange, Event, KeyEventKind};
use crossterm::{execute, terminal::SetTitle};
use std::io::stdout;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

mod actions;
mod app;
mod config;
mod controller;
mod countdown;
mod error;
mod notify;
mod persistence;
mod session;
mod sync;
mod ticker;

use actions::Action;
use app::App;
use config::Config;
use controller::Controller;
use countdown::{Clock, SystemClock};
use notify::DesktopNotifier;
use persistence::FileStore;
use session::DisplayFrame;
use sync::Timekeeper;

fn init_logging(config: &Config) -> Result<()> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(state_dir.join("pomosync.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config)?;

    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Spawn the background timekeeper and connect to it without blocking start-up
    let timekeeper = Timekeeper::spawn(clock.clone(), config.drift_tolerance_secs);
    let connect_tx = tx.clone();
    let connect_handle = timekeeper.clone();
    tokio::spawn(async move {
        match connect_handle.connect().await {
            Ok(connection) => {
                let _ = connect_tx.send(Action::Connected(connection));
            }
            Err(e) => {
                let _ = connect_tx.send(Action::Error(format!("Timekeeper: {}", e)));
            }
        }
    });

    let (frame_tx, frame_rx) = watch::channel(DisplayFrame::default());
    let controller = Controller::builder(config.clone(), clock)
        .display(frame_tx)
        .notifier(DesktopNotifier::new("pomosync"))
        .store(FileStore::new(config.state_dir()))
        .events(tx.clone())
        .build()?;

    // Initialize terminal
    let mut terminal = ratatui::init();
    execute!(stdout(), EnableFocusChange)?;

    // Spawn input handler
    let input_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            if event::poll(Duration::from_millis(100)).unwrap_or(false) {
                let action = match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        Action::KeyPress(key)
                    }
                    Ok(Event::FocusLost) => Action::Suspended,
                    Ok(Event::FocusGained) => Action::Resumed,
                    _ => continue,
                };
                if input_tx.send(action).is_err() {
                    break;
                }
            }
        }
    });

    // Spawn liveness poller
    let liveness_tx = tx.clone();
    let liveness_interval = config.liveness_interval();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(liveness_interval).await;
            if liveness_tx.send(Action::LivenessCheck).is_err() {
                break;
            }
        }
    });

    // Create app state
    let mut app = App::new(controller, frame_rx);
    let mut title = String::new();

    // Main event loop
    let result = loop {
        // Render
        terminal.draw(|f| app.render(f))?;

        let frame = app.frame();
        if frame.title != title {
            title = frame.title;
            let _ = execute!(stdout(), SetTitle(&title));
        }

        // Handle events from channel
        tokio::select! {
            Some(action) = rx.recv() => {
                match app.handle_action(action) {
                    Ok(should_quit) => {
                        if should_quit {
                            break Ok(());
                        }
                    }
                    Err(e) => {
                        break Err(e);
                    }
                }
            }
        }
    };

    // Restore terminal
    let _ = execute!(stdout(), DisableFocusChange);
    ratatui::restore();
    timekeeper.terminate();
    result
}
