//! Uploader configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/chunkup/config.toml`
//! - Windows: `%APPDATA%/chunkup/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use chunkup_protocol::constants::{
    DEFAULT_CHUNK_SIZE_KB, DEFAULT_MAX_CHUNK_RETRIES, DEFAULT_MAX_SERVER_BACKOFFS,
};
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Chunk size used when an upload does not pick one, in KiB.
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: u64,

    /// Retries allowed for a single chunk when an upload does not pick a value.
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,

    /// Consecutive server-busy responses tolerated before warning the caller.
    #[serde(default = "default_max_server_backoffs")]
    pub max_server_backoffs: u32,

    /// Backoff unit in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Exclusive upper bound of the backoff jitter in milliseconds.
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,

    /// Seconds a request may go without sending body bytes or receiving a
    /// response before it times out (0 = never).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Buffered events per subscriber before slow subscribers lag.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_chunk_size_kb() -> u64 {
    DEFAULT_CHUNK_SIZE_KB
}

fn default_max_chunk_retries() -> u32 {
    DEFAULT_MAX_CHUNK_RETRIES
}

fn default_max_server_backoffs() -> u32 {
    DEFAULT_MAX_SERVER_BACKOFFS
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff_cap_ms() -> u64 {
    5000
}

fn default_backoff_jitter_ms() -> u64 {
    1000
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size_kb: default_chunk_size_kb(),
            max_chunk_retries: default_max_chunk_retries(),
            max_server_backoffs: default_max_server_backoffs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl UploaderConfig {
    /// Parses configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: UploaderConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Backoff policy described by this configuration.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
            jitter_max: Duration::from_millis(self.backoff_jitter_ms),
        }
    }

    /// Idle timeout for chunk requests, if any.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Returns the platform-specific configuration file path.
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("chunkup").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("chunkup")
            .join("config.toml")
    }
}
