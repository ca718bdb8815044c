//! Configuration for the ingestion engine.
//!
//! Stored as TOML. Every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! litterbox = false
//!
//! [activity]
//! timeout_ms = 10000
//! max_attempts = 1
//! initial_backoff_ms = 200
//! max_backoff_ms = 5000
//!
//! [tracking]
//! write_timeout_ms = 10000
//! subscriber_buffer = 256
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::durable::{ActivityOptions, RetryPolicy};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    ValidationError(String),

    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),
}

/// Bounds and retries for local activities (binding resolution, runs,
/// state writes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per activity, including the first. `1` disables retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ActivityConfig {
    pub fn options(&self) -> ActivityOptions {
        ActivityOptions::new(
            Duration::from_millis(self.timeout_ms),
            RetryPolicy {
                max_attempts: self.max_attempts,
                initial_backoff: Duration::from_millis(self.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            },
        )
    }
}

/// State tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Bound on a single state write, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Per-subscriber buffer of the in-memory pub/sub.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_subscriber_buffer() -> usize {
    crate::pubsub::DEFAULT_SUBSCRIBER_BUFFER
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_timeout_ms(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl TrackingConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TributaryConfig {
    #[serde(default)]
    pub activity: ActivityConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Decode association tokens as `"<token>,<binding name>"`.
    #[serde(default)]
    pub litterbox: bool,
}

impl TributaryConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::PathNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.activity.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "activity.timeout_ms must be positive".into(),
            ));
        }
        if self.activity.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "activity.max_attempts must be at least 1".into(),
            ));
        }
        if self.activity.initial_backoff_ms > self.activity.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "activity.initial_backoff_ms exceeds activity.max_backoff_ms".into(),
            ));
        }
        if self.tracking.write_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tracking.write_timeout_ms must be positive".into(),
            ));
        }
        if self.tracking.subscriber_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "tracking.subscriber_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}
