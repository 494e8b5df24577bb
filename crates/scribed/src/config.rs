//! scribed.toml configuration.
//!
//! Every section falls back to its defaults, so an empty file (or no file
//! at all) yields a working standalone setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use scribegrid_scheduler::{SchedulerConfig, SweeperConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub sweeper: SweeperConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/scribegrid"),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply CLI overrides on top of the file values.
    pub fn with_overrides(mut self, port: Option<u16>, data_dir: Option<PathBuf>) -> Self {
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(data_dir) = data_dir {
            self.server.data_dir = data_dir;
        }
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.server.data_dir.join("scribegrid.redb")
    }
}
