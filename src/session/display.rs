use tokio::sync::watch;

use super::{Phase, SessionState};

/// How ticks are currently being produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// No timekeeper link yet; the local countdown covers any commands
    #[default]
    Connecting,
    Timekeeper,
    /// Timekeeper given up on for the rest of the run
    Local,
}

impl SyncMode {
    pub fn label(self) -> &'static str {
        match self {
            SyncMode::Connecting => "connecting",
            SyncMode::Timekeeper => "timekeeper",
            SyncMode::Local => "local",
        }
    }
}

/// Everything the display surface needs for one state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    /// `MM:SS`
    pub display: String,
    pub title: String,
    pub label: &'static str,
    pub button: &'static str,
    pub mode: SyncMode,
}

impl DisplayFrame {
    pub fn render(state: &SessionState, mode: SyncMode) -> Self {
        let display = format_clock(state.remaining());
        let label = match state.phase() {
            Phase::Paused => "Paused",
            _ => state.kind().label(),
        };
        Self {
            title: format!("Pomodoro - {}", display),
            display,
            label,
            button: if state.running() { "Pause" } else { "Start" },
            mode,
        }
    }
}

impl Default for DisplayFrame {
    fn default() -> Self {
        Self {
            display: format_clock(0),
            title: String::from("Pomodoro"),
            label: "",
            button: "Start",
            mode: SyncMode::default(),
        }
    }
}

/// `MM:SS`, with minutes allowed to run past two digits
pub fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Receiver of rendered frames. Purely a sink.
pub trait DisplaySink: Send {
    fn show(&mut self, frame: &DisplayFrame);
}

impl DisplaySink for watch::Sender<DisplayFrame> {
    fn show(&mut self, frame: &DisplayFrame) {
        self.send_replace(frame.clone());
    }
}
