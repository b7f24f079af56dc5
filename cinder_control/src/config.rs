//! Control-plane configuration.
//!
//! Loads settings from a TOML file and provides sensible defaults for
//! everything, so a missing file or a partial file both work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing the TOML configuration
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Settings for the control plane.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Path of the tunnel worker's control socket
    #[serde(default = "default_worker_socket")]
    pub worker_socket: PathBuf,

    /// Path of the profile registry file
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,

    /// Reply window for tunnel commands, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Bound on buffered diagnostic lines
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Log-relay drain interval, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_worker_socket() -> PathBuf {
    PathBuf::from("/var/run/cindervpn/worker.sock")
}

fn default_registry_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cindervpn")
        .join("profile.json")
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_log_capacity() -> usize {
    crate::logs::DEFAULT_LOG_CAPACITY
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            worker_socket: default_worker_socket(),
            registry_path: default_registry_path(),
            command_timeout_ms: default_command_timeout_ms(),
            log_capacity: default_log_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ControlConfig {
    /// Load from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load from a TOML file if it exists; defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
