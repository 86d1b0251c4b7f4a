use thiserror::Error;

use crate::session::Phase;

/// Errors from driving the session state machine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {op} while {phase}")]
    InvalidTransition { op: &'static str, phase: Phase },

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}

/// Errors encoding or decoding wire frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors talking to the background timekeeper
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("timekeeper unreachable")]
    Unreachable,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum TimekeeperError {
    #[error("failed to encode report: {0}")]
    Encode(#[from] ProtocolError),
}

/// Reasons a persisted snapshot is unusable
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot is stale ({age_secs}s old)")]
    Stale { age_secs: i64 },

    #[error("snapshot was saved in the future")]
    FromFuture,

    #[error("snapshot has {remaining}s left, outside 1..={limit}s")]
    OutOfRange { remaining: u64, limit: u64 },
}
