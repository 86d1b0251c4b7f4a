mod link;
pub mod protocol;
mod timekeeper;

pub use link::{Connection, Link};
pub use protocol::{Command, Report};
pub use timekeeper::{ClientId, Inbound, Timekeeper, TimekeeperHandle};
