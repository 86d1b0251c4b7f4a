use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::Durations;

const APP_NAME: &str = "pomosync";
const CONFIG_ENV: &str = "POMOSYNC_CONFIG";

/// Per-process configuration, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub durations: Durations,
    pub tick_interval_ms: u64,
    /// How often the controller pings the timekeeper
    pub liveness_interval_ms: u64,
    /// Consecutive failed pings before falling back to the local countdown for good
    pub max_liveness_failures: u32,
    /// Drift tolerated before the epoch-derived value overrides a tick
    pub drift_tolerance_secs: u64,
    /// Snapshots older than this are discarded instead of resumed
    pub snapshot_staleness_secs: u64,
    /// Where the snapshot and log live
    pub state_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            durations: Durations::default(),
            tick_interval_ms: 1000,
            liveness_interval_ms: 5000,
            max_liveness_failures: 3,
            drift_tolerance_secs: 2,
            snapshot_staleness_secs: 60 * 60,
            state_dir: None,
        }
    }
}

impl Config {
    /// Load from `$POMOSYNC_CONFIG`, else the user config dir. A missing file
    /// means defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from).or_else(|| {
            dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.json"))
        });
        match path {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.durations.focus_secs == 0 || self.durations.break_secs == 0 {
            anyhow::bail!("session durations must be at least one second");
        }
        if self.tick_interval_ms == 0 || self.liveness_interval_ms == 0 {
            anyhow::bail!("tick and liveness intervals must be positive");
        }
        if self.max_liveness_failures == 0 {
            anyhow::bail!("maxLivenessFailures must be at least 1");
        }
        if staleness_window(self.snapshot_staleness_secs).is_none() {
            anyhow::bail!(
                "snapshotStalenessSecs {} is out of range",
                self.snapshot_staleness_secs
            );
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_default()
                .join(APP_NAME)
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    /// Saturates for windows too large to represent
    pub fn snapshot_staleness(&self) -> chrono::Duration {
        staleness_window(self.snapshot_staleness_secs).unwrap_or(chrono::Duration::MAX)
    }
}

fn staleness_window(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
}
