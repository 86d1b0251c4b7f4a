use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Handle to the one periodic tick task a process may run.
///
/// Installing a loop always cancels the previous one first. Every loop is
/// stamped with a generation so that a tick queued by a cancelled loop can be
/// recognised and dropped by the receiver.
#[derive(Debug, Default)]
pub struct TickLoop {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TickLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any running loop with one that calls `on_tick` every `period`.
    /// The loop ends on its own once `on_tick` returns false.
    pub fn install<F>(&mut self, period: Duration, mut on_tick: F) -> u64
    where
        F: FnMut(u64) -> bool + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let period = period.max(Duration::from_millis(1));

        self.handle = Some(tokio::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + period, period);
            // A stalled host coalesces missed ticks instead of bursting them
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if !on_tick(generation) {
                    break;
                }
            }
        }));
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether a loop is installed and still ticking
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Whether a tick stamped with `generation` came from the installed loop
    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}
