//! Configuration loading, parsing, and validation for Pledge.
//!
//! ```toml
//! reject_mode = "deferred"
//!
//! [collector]
//! enabled = true
//! interval_ms = 5000
//! max_errors_per_tick = 2
//! max_per_second = 1
//! hard_max_tracked = 20
//! ```
//!
//! Every field is optional; missing fields take the defaults above.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {source}")]
    Parse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How `reject` delivers a failure.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RejectMode {
    /// Settle synchronously on the rejecting thread.
    Immediate,
    /// Schedule the settlement on the executor, leaving a window for errbacks
    /// to be attached before the failure counts as unobserved.
    #[default]
    Deferred,
}

impl RejectMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Deferred => "deferred",
        }
    }
}

/// Leak detector tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectorConfig {
    /// Install the failure collector as the failure sink. Default: true.
    pub enabled: bool,
    /// Normal delay between sweeps, in milliseconds.
    pub interval_ms: u64,
    /// Reports emitted per sweep before switching to the cool-down interval.
    pub max_errors_per_tick: u32,
    /// Report rate during cool-down; the cool-down delay is `1000ms / max_per_second`.
    pub max_per_second: u32,
    /// Ceiling on simultaneously tracked failures. `0` disables the ceiling.
    pub hard_max_tracked: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
            max_errors_per_tick: 2,
            max_per_second: 1,
            hard_max_tracked: 20,
        }
    }
}

impl CollectorConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.max_per_second.max(1)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "collector.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_errors_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "collector.max_errors_per_tick must be greater than 0".to_string(),
            ));
        }
        if self.max_per_second == 0 || self.max_per_second > 1000 {
            return Err(ConfigError::Invalid(
                "collector.max_per_second must be between 1 and 1000".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PledgeConfig {
    pub reject_mode: RejectMode,
    pub collector: CollectorConfig,
}

impl PledgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let config: Self = match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse {
                    path: Some(path.to_path_buf()),
                    source: err,
                });
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collector.validate()
    }
}
