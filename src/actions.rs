use crossterm::event::KeyEvent;

use crate::sync::{Connection, Report};

/// Actions that can be dispatched through the application
#[derive(Debug)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// The timekeeper accepted our connection
    Connected(Connection),
    /// A report arrived from the timekeeper
    Report(Report),
    /// The local fallback countdown ticked (stamped with its loop generation)
    FallbackTick(u64),
    /// Time to verify the timekeeper is still alive
    LivenessCheck,
    /// The terminal lost focus
    Suspended,
    /// The terminal regained focus
    Resumed,
    /// An error occurred
    Error(String),
    /// Request to quit the application
    Quit,
}
