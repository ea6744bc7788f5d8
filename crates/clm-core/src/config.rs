//! Client configuration for membership handles.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Version;

/// Environment variable overriding the requested release code.
pub const ENV_RELEASE_CODE: &str = "CLM_RELEASE_CODE";
/// Environment variable overriding the requested major version.
pub const ENV_MAJOR_VERSION: &str = "CLM_MAJOR_VERSION";
/// Environment variable overriding the blocking dispatch timeout.
pub const ENV_DISPATCH_TIMEOUT_MS: &str = "CLM_DISPATCH_TIMEOUT_MS";

const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 1_000;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Handle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClmConfig {
    /// Version requested on initialize.
    #[serde(default)]
    pub version: Version,

    /// Bound for blocking dispatch in loops such as the dispatch pump.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
}

const fn default_dispatch_timeout_ms() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT_MS
}

impl Default for ClmConfig {
    fn default() -> Self {
        Self {
            version: Version::default(),
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
        }
    }
}

impl ClmConfig {
    /// Parse from a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error if the document is not valid configuration JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded CLM configuration");
        Self::from_json_str(&contents)
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    /// Returns error if a set variable cannot be parsed.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// # Errors
    /// Returns error if a present value cannot be parsed.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_RELEASE_CODE) {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => self.version.release_code = c,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_RELEASE_CODE,
                        value,
                    });
                }
            }
        }

        if let Some(value) = lookup(ENV_MAJOR_VERSION) {
            self.version.major_version =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    key: ENV_MAJOR_VERSION,
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup(ENV_DISPATCH_TIMEOUT_MS) {
            self.dispatch_timeout_ms = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_DISPATCH_TIMEOUT_MS,
                value: value.clone(),
            })?;
        }

        Ok(self)
    }

    /// Blocking dispatch bound as a duration.
    #[must_use]
    pub const fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}
