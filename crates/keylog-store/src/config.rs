use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Flush/sync strategy for file-backed engines.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// `fsync` on the first write after `interval_ms` has elapsed.
    Periodic { interval_ms: u64 },
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

impl SyncMode {
    /// The periodic interval, if any.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Periodic { interval_ms } => Some(Duration::from_millis(*interval_ms)),
            _ => None,
        }
    }
}

/// Configuration for durable stores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Sync strategy for appended records.
    pub sync_mode: SyncMode,
    /// Name of the record file inside the store directory.
    pub file_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            file_name: "records.log".to_string(),
        }
    }
}

impl StoreConfig {
    /// A configuration that syncs every write.
    pub fn durable() -> Self {
        Self {
            sync_mode: SyncMode::EveryWrite,
            ..Default::default()
        }
    }
}
