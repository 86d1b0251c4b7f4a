use chrono::{DateTime, Utc};

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The host's wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Seconds left on a countdown of `initial` seconds that began at `epoch`.
///
/// Elapsed time is floored to whole seconds and a clock that moved backwards
/// counts as no time elapsed.
pub fn reconcile(initial: u64, epoch: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let elapsed_ms = (now - epoch).num_milliseconds().max(0);
    initial.saturating_sub((elapsed_ms / 1000) as u64)
}

/// A running countdown anchored to the wall-clock instant it began.
///
/// Only the epoch and the value at the epoch are kept, never an accumulated
/// "elapsed so far", so repeated corrections cannot compound rounding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    initial: u64,
    epoch: DateTime<Utc>,
}

impl Countdown {
    pub fn begin(initial: u64, now: DateTime<Utc>) -> Self {
        Self {
            initial,
            epoch: now,
        }
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Remaining seconds according to the wall clock alone
    pub fn expected(&self, now: DateTime<Utc>) -> u64 {
        reconcile(self.initial, self.epoch, now)
    }

    /// Keep `tracked` unless it drifted more than `tolerance` seconds away
    /// from the epoch-derived value, in which case the epoch wins.
    pub fn correct(&self, tracked: u64, now: DateTime<Utc>, tolerance: u64) -> u64 {
        let expected = self.expected(now);
        if tracked.abs_diff(expected) > tolerance {
            expected
        } else {
            tracked
        }
    }

    /// One scheduled tick: decrement by a second, then correct for drift.
    /// Never moves the value upwards.
    pub fn step(&self, current: u64, now: DateTime<Utc>, tolerance: u64) -> u64 {
        self.correct(current.saturating_sub(1), now, tolerance)
            .min(current)
    }
}
