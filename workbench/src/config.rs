//! Workbench configuration.
//!
//! A [`WorkbenchConfig`] can be built in code or loaded from TOML, where
//! every field is optional:
//!
//! ```
//! use std::time::Duration;
//!
//! use workbench::config::WorkbenchConfig;
//!
//! let config = WorkbenchConfig::from_toml_str(
//!     r#"
//!     status_log_capacity = 50
//!     synced_settings_debounce_ms = 200
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.status_log_capacity, 50);
//! assert_eq!(config.synced_settings_debounce(), Duration::from_millis(200));
//! assert_eq!(config.default_query_stale_time(), Duration::ZERO);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read configuration file")]
    Io(#[from] std::io::Error),
    /// The configuration is not valid TOML or has unknown fields.
    #[error("invalid configuration")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Tunables of a workbench.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkbenchConfig {
    /// Maximum number of entries kept in the status log of each instance.
    pub status_log_capacity: usize,
    /// Quiet window, in milliseconds, after which a synced setting value is
    /// propagated to other instances. Zero propagates immediately.
    pub synced_settings_debounce_ms: u64,
    /// Time, in milliseconds, during which a cached query result is
    /// considered fresh.
    pub default_query_stale_time_ms: u64,
    /// Time, in milliseconds, after which a query result that is neither
    /// read nor observed is evicted from the cache.
    pub query_gc_time_ms: u64,
}

impl WorkbenchConfig {
    /// Parses a TOML configuration.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;

        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;

        Self::from_toml_str(&source)
    }

    /// Returns the synced settings debounce window.
    pub fn synced_settings_debounce(&self) -> Duration {
        Duration::from_millis(self.synced_settings_debounce_ms)
    }

    /// Returns the default query stale time.
    pub fn default_query_stale_time(&self) -> Duration {
        Duration::from_millis(self.default_query_stale_time_ms)
    }

    /// Returns the query gc time.
    pub fn query_gc_time(&self) -> Duration {
        Duration::from_millis(self.query_gc_time_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.status_log_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "status_log_capacity",
                reason: "must be at least 1",
            });
        }

        Ok(())
    }
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            status_log_capacity: 100,
            synced_settings_debounce_ms: 0,
            default_query_stale_time_ms: 0,
            query_gc_time_ms: 300_000,
        }
    }
}
