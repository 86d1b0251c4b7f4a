use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::SnapshotError;
use crate::session::{Durations, SessionKind, SessionState};

pub const SNAPSHOT_KEY: &str = "session";

/// What survives a restart. Always stored paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub remaining_seconds: u64,
    pub kind: SessionKind,
    pub running: bool,
    pub saved_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn capture(kind: SessionKind, remaining_seconds: u64, now: DateTime<Utc>) -> Self {
        Self {
            remaining_seconds,
            kind,
            running: false,
            saved_at: now,
        }
    }

    /// Check the snapshot is fresh and fits the configured durations
    pub fn validate(
        &self,
        durations: Durations,
        now: DateTime<Utc>,
        staleness: Duration,
    ) -> Result<(), SnapshotError> {
        let age = now - self.saved_at;
        if age < Duration::zero() {
            return Err(SnapshotError::FromFuture);
        }
        if age > staleness {
            return Err(SnapshotError::Stale {
                age_secs: age.num_seconds(),
            });
        }
        let limit = durations.of(self.kind);
        if self.remaining_seconds == 0 || self.remaining_seconds > limit {
            return Err(SnapshotError::OutOfRange {
                remaining: self.remaining_seconds,
                limit,
            });
        }
        Ok(())
    }
}

/// Opaque key-value storage for snapshots
pub trait SnapshotStore: Send {
    fn put(&mut self, key: &str, snapshot: &Snapshot) -> Result<(), SnapshotError>;
    fn get(&self, key: &str) -> Result<Option<Snapshot>, SnapshotError>;
}

/// One JSON file per key under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SnapshotStore for FileStore {
    fn put(&mut self, key: &str, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Snapshot>, SnapshotError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn put(&mut self, key: &str, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        self.entries.insert(key.to_string(), snapshot.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.entries.get(key).cloned())
    }
}

/// Rebuild the session from the stored snapshot, or start fresh when there is
/// none or it cannot be trusted. Restored sessions are always paused.
pub fn restore(
    store: &dyn SnapshotStore,
    durations: Durations,
    now: DateTime<Utc>,
    staleness: Duration,
) -> SessionState {
    let snapshot = match store.get(SNAPSHOT_KEY) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return SessionState::new(durations),
        Err(e) => {
            warn!(error = %e, "Discarding unreadable snapshot");
            return SessionState::new(durations);
        }
    };

    match snapshot.validate(durations, now, staleness) {
        Ok(()) => {
            info!(
                remaining = snapshot.remaining_seconds,
                kind = %snapshot.kind,
                "Restored paused session"
            );
            SessionState::restored(durations, snapshot.kind, snapshot.remaining_seconds)
        }
        Err(e) => {
            info!(reason = %e, "Discarding snapshot");
            SessionState::new(durations)
        }
    }
}
