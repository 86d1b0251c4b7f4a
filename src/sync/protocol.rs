//! Wire contract between the controller and the timekeeper.
//!
//! Every message crosses the boundary as one JSON text frame. Commands are
//! tagged by `action`, reports by `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

/// Controller to timekeeper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    /// (Re)start the countdown from `initial_seconds`
    Start {
        #[serde(rename = "initialTime")]
        initial_seconds: u64,
        #[serde(rename = "interval", default = "default_tick_interval_ms")]
        tick_interval_ms: u64,
    },
    Stop,
    Reset {
        #[serde(rename = "initialTime")]
        initial_seconds: u64,
    },
    /// Ask for the current state, answered to the sender only
    Sync,
    Ping,
}

/// Timekeeper to controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Report {
    #[serde(rename_all = "camelCase")]
    Tick {
        remaining_seconds: u64,
        running: bool,
        /// Set on the answer to a `sync` command
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        resync: bool,
    },
    #[serde(rename_all = "camelCase")]
    Completed { remaining_seconds: u64, running: bool },
    Error { message: String },
    Pong,
}

impl Report {
    pub fn tick(remaining_seconds: u64, running: bool) -> Self {
        Report::Tick {
            remaining_seconds,
            running,
            resync: false,
        }
    }

    pub fn completed() -> Self {
        Report::Completed {
            remaining_seconds: 0,
            running: false,
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(frame)?)
}
