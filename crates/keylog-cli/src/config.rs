use std::path::{Path, PathBuf};

use anyhow::Context;
use keylog_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// Settings for the `keylog` binary, loaded from an optional TOML file.
///
/// ```toml
/// data_dir = "/var/lib/keylog"
///
/// [store]
/// file_name = "records.log"
/// sync_mode = { mode = "periodic", interval_ms = 500 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub store: StoreConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("keylog-data"),
            store: StoreConfig::default(),
        }
    }
}

impl CliConfig {
    /// Read `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply command line overrides.
    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        self
    }

    pub fn entries_dir(&self) -> PathBuf {
        self.data_dir.join("entries")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }
}
