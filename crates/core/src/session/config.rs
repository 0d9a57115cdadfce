use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Tunables of a [`ProfilingSession`](super::ProfilingSession).
///
/// ```toml
/// log_file_name = "memory.mlog"
/// snapshot_extension = "snapshot"
/// stat_flush_threshold = 5000
/// stat_read_chunk = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session log inside the session directory.
    pub log_file_name: String,
    /// Extension, without the dot, of snapshot files found next to the log.
    pub snapshot_extension: String,
    /// Rewrite the log header after this many appended stat items.
    pub stat_flush_threshold: usize,
    /// Stat items read per batch when loading a log.
    pub stat_read_chunk: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_file_name: "memory.mlog".to_string(),
            snapshot_extension: "snapshot".to_string(),
            stat_flush_threshold: 5000,
            stat_read_chunk: 1000,
        }
    }
}

impl SessionConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
