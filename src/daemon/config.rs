//! Configuration management for daemon mode
//!
//! Handles TOML configuration parsing, defaults and validation

use crate::constants::{
    DEFAULT_POLLING_INTERVAL, DEFAULT_QUEUE_CAPACITY, DEFAULT_TERMINATION_RETRIES, MAX_POLLING_INTERVAL,
    MIN_POLLING_INTERVAL,
};
use crate::daemon::logging::LogLevel;
use crate::policy::{BlocklistEntry, PolicyError, PolicyStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Polling interval must be between 0.1 and 300 seconds, got {0}")]
    InvalidInterval(f64),

    #[error("Queue capacity must be at least 1")]
    InvalidQueueCapacity,

    #[error("Invalid blocklist entry #{index}: {source}")]
    InvalidBlocklist {
        index: usize,
        #[source]
        source: PolicyError,
    },

    #[error("Cannot determine the platform {0} directory")]
    NoDefaultDirectory(&'static str),
}

/// Main daemon configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfiguration {
    pub daemon: DaemonSettings,
    pub storage: StorageSettings,
    /// Initial blocklist
    pub blocklist: Vec<BlocklistEntry>,
}

/// Core daemon runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Polling interval in seconds (0.1-300.0)
    pub polling_interval: f64,
    /// Per-subscriber event queue capacity
    pub queue_capacity: usize,
    /// Extra termination attempts after a failed one
    pub termination_retries: u32,
    pub log_level: LogLevel,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            polling_interval: DEFAULT_POLLING_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            termination_retries: DEFAULT_TERMINATION_RETRIES,
            log_level: LogLevel::default(),
        }
    }
}

/// Event persistence settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for the JSON event log (platform default when unset)
    pub event_log_dir: Option<PathBuf>,
}

impl DaemonConfiguration {
    /// Load and validate a configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse without validating
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_path = Self::default_config_path()?;
                if default_path.exists() {
                    Self::load_from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// `<config dir>/procguard/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoDefaultDirectory("config"))?;
        Ok(base.join("procguard").join("config.toml"))
    }

    /// Configured event log directory, or `<data dir>/procguard/events`
    pub fn event_log_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.storage.event_log_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_local_dir().ok_or(ConfigError::NoDefaultDirectory("data"))?;
        Ok(base.join("procguard").join("events"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interval(self.daemon.polling_interval)?;

        if self.daemon.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }

        let probe = PolicyStore::new();
        for (index, entry) in self.blocklist.iter().enumerate() {
            probe
                .add_entry(entry.clone())
                .map_err(|source| ConfigError::InvalidBlocklist { index, source })?;
        }

        Ok(())
    }

    pub fn polling_duration(&self) -> Duration {
        Duration::from_secs_f64(self.daemon.polling_interval)
    }
}

pub fn validate_interval(seconds: f64) -> Result<(), ConfigError> {
    if !seconds.is_finite() || !(MIN_POLLING_INTERVAL..=MAX_POLLING_INTERVAL).contains(&seconds) {
        return Err(ConfigError::InvalidInterval(seconds));
    }
    Ok(())
}
