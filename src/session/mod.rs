mod display;

pub use display::{DisplayFrame, DisplaySink, SyncMode};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::countdown::Countdown;
use crate::error::SessionError;

/// Which kind of interval the session is counting down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[default]
    Focus,
    Break,
}

impl SessionKind {
    pub fn other(self) -> Self {
        match self {
            SessionKind::Focus => SessionKind::Break,
            SessionKind::Break => SessionKind::Focus,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionKind::Focus => "Focus Session",
            SessionKind::Break => "Break Time",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Focus => write!(f, "focus"),
            SessionKind::Break => write!(f, "break"),
        }
    }
}

/// Configured length of each session kind, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Durations {
    pub focus_secs: u64,
    pub break_secs: u64,
}

impl Durations {
    pub fn of(&self, kind: SessionKind) -> u64 {
        match kind {
            SessionKind::Focus => self.focus_secs,
            SessionKind::Break => self.break_secs,
        }
    }
}

impl Default for Durations {
    fn default() -> Self {
        Self {
            focus_secs: 25 * 60,
            break_secs: 5 * 60,
        }
    }
}

/// Phase of the session as seen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not running, full time remaining
    Idle,
    Running,
    /// Not running, part of the time used
    Paused,
    /// Reached zero; reaped immediately by the controller
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Paused => "paused",
            Phase::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Result of feeding a new countdown value into a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Session not running; nothing applied
    Ignored,
    Ticking(u64),
    /// Hit zero; carries the kind that just finished
    Completed(SessionKind),
}

/// The controller's owned countdown state.
///
/// `running` is derived from the presence of a [`Countdown`], so a running
/// session always has an epoch and a stopped one never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    remaining: u64,
    kind: SessionKind,
    countdown: Option<Countdown>,
    durations: Durations,
}

impl SessionState {
    pub fn new(durations: Durations) -> Self {
        Self {
            remaining: durations.of(SessionKind::Focus),
            kind: SessionKind::Focus,
            countdown: None,
            durations,
        }
    }

    /// A paused session resumed from a snapshot
    pub fn restored(durations: Durations, kind: SessionKind, remaining: u64) -> Self {
        Self {
            remaining,
            kind,
            countdown: None,
            durations,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn running(&self) -> bool {
        self.countdown.is_some()
    }

    pub fn epoch(&self) -> Option<DateTime<Utc>> {
        self.countdown.map(|c| c.epoch())
    }

    pub fn countdown(&self) -> Option<&Countdown> {
        self.countdown.as_ref()
    }

    pub fn phase(&self) -> Phase {
        if self.running() {
            Phase::Running
        } else if self.remaining == 0 {
            Phase::Completed
        } else if self.remaining < self.durations.of(self.kind) {
            Phase::Paused
        } else {
            Phase::Idle
        }
    }

    /// Begin counting down from the current value; returns that value
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<u64, SessionError> {
        match self.phase() {
            Phase::Idle | Phase::Paused => {
                self.countdown = Some(Countdown::begin(self.remaining, now));
                Ok(self.remaining)
            }
            phase => Err(SessionError::InvalidTransition { op: "start", phase }),
        }
    }

    /// Stop counting, settling on the reconciled remaining time
    pub fn halt(&mut self, now: DateTime<Utc>, tolerance: u64) -> Result<Progress, SessionError> {
        let Some(countdown) = self.countdown.take() else {
            return Err(SessionError::InvalidTransition {
                op: "stop",
                phase: self.phase(),
            });
        };
        self.remaining = countdown.correct(self.remaining, now, tolerance).min(self.remaining);
        if self.remaining == 0 {
            Ok(Progress::Completed(self.kind))
        } else {
            Ok(Progress::Ticking(self.remaining))
        }
    }

    /// Back to the full duration of the current kind, not running
    pub fn rewind(&mut self) -> u64 {
        self.countdown = None;
        self.remaining = self.durations.of(self.kind);
        self.remaining
    }

    /// Flip to the other kind with its full duration, not running
    pub fn switch_kind(&mut self) -> u64 {
        self.kind = self.kind.other();
        self.rewind()
    }

    /// Apply a countdown value reported by a tick source. The value is
    /// corrected against the epoch and may never raise the remaining time.
    /// Reaching zero stops the session.
    pub fn advance(&mut self, reported: u64, now: DateTime<Utc>, tolerance: u64) -> Progress {
        let Some(countdown) = self.countdown else {
            return Progress::Ignored;
        };
        self.remaining = countdown.correct(reported, now, tolerance).min(self.remaining);
        if self.remaining == 0 {
            self.countdown = None;
            Progress::Completed(self.kind)
        } else {
            Progress::Ticking(self.remaining)
        }
    }

    /// Run one local tick: decrement and correct for drift
    pub fn step(&mut self, now: DateTime<Utc>, tolerance: u64) -> Progress {
        let Some(countdown) = self.countdown else {
            return Progress::Ignored;
        };
        let next = countdown.step(self.remaining, now, tolerance);
        self.advance(next, now, tolerance)
    }
}
