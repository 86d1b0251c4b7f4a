use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use tokio::sync::watch;
use tracing::warn;

use crate::actions::Action;
use crate::controller::Controller;
use crate::session::{DisplayFrame, SessionKind, SyncMode};

/// Theme colors
pub struct Theme {
    pub fg: Color,
    pub accent: Color,
    pub rest: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87),
            rest: Color::Rgb(97, 175, 239),
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

/// Main application state
pub struct App {
    /// Owner of the session
    pub controller: Controller,
    /// Frames published by the controller
    frames: watch::Receiver<DisplayFrame>,
    /// Current message to display (info or error)
    pub error_message: Option<String>,
    /// Theme
    pub theme: Theme,
}

impl App {
    pub fn new(controller: Controller, frames: watch::Receiver<DisplayFrame>) -> Self {
        Self {
            controller,
            frames,
            error_message: None,
            theme: Theme::default(),
        }
    }

    /// The most recent frame published by the controller
    pub fn frame(&self) -> DisplayFrame {
        self.frames.borrow().clone()
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => return self.handle_key(key),
            Action::Connected(connection) => self.controller.attach(connection),
            Action::Report(report) => self.controller.on_report(report),
            Action::FallbackTick(generation) => self.controller.on_fallback_tick(generation),
            Action::LivenessCheck => self.controller.check_liveness(),
            Action::Suspended => self.controller.suspend(),
            Action::Resumed => self.controller.resync(),
            Action::Error(msg) => {
                warn!(%msg, "Background task error");
                self.error_message = Some(msg);
            }
            Action::Quit => {
                self.controller.suspend();
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        // Clear message on any key press
        self.error_message = None;

        let outcome = match key.code {
            KeyCode::Char('q') => return self.handle_action(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return self.handle_action(Action::Quit);
            }
            KeyCode::Char(' ') | KeyCode::Char('s') | KeyCode::Enter => {
                self.controller.toggle_running()
            }
            KeyCode::Char('r') => {
                self.controller.reset();
                Ok(())
            }
            KeyCode::Char('t') => {
                self.controller.toggle_kind();
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(e) = outcome {
            self.error_message = Some(e.to_string());
        }
        Ok(false)
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let display = self.frame();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Countdown
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0], &display);
        self.render_countdown(frame, chunks[1], &display);
        self.render_footer(frame, chunks[2]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect, display: &DisplayFrame) {
        let mode_color = match display.mode {
            SyncMode::Timekeeper => self.theme.success,
            SyncMode::Connecting => self.theme.warning,
            SyncMode::Local => self.theme.dim,
        };
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " Pomosync ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled("│ ticks: ", Style::default().fg(self.theme.dim)),
            Span::styled(display.mode.label(), Style::default().fg(mode_color)),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_countdown(&self, frame: &mut Frame, area: Rect, display: &DisplayFrame) {
        let kind_color = match self.controller.state().kind() {
            SessionKind::Focus => self.theme.accent,
            SessionKind::Break => self.theme.rest,
        };
        let inner_height = area.height.saturating_sub(2);
        let padding = inner_height.saturating_sub(5) / 2;

        let mut content: Vec<Line> = (0..padding).map(|_| Line::from("")).collect();
        content.extend([
            Line::from(Span::styled(
                display.label,
                Style::default().fg(kind_color).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(
                display.display.as_str(),
                Style::default().fg(self.theme.fg).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled(
                format!("[ {} ]", display.button),
                Style::default().fg(self.theme.dim),
            )),
        ]);

        let countdown = Paragraph::new(content)
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .title(" Session ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            );
        frame.render_widget(countdown, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text = " q: Quit │ Space: Start/Pause │ r: Reset │ t: Switch session ";

        let content = if let Some(ref msg) = self.error_message {
            Line::from(Span::styled(
                format!(" {} ", msg),
                Style::default().fg(self.theme.error),
            ))
        } else {
            Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim)))
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }
}
