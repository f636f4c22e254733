//! Error types for configuration loading.

use thiserror::Error;

/// Primary error type for configuration loading.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key was absent or empty.
    #[error("missing required configuration key")]
    Missing {
        /// Environment key.
        key: &'static str,
    },
    /// A key held a value that failed validation.
    #[error("invalid configuration value")]
    InvalidValue {
        /// Environment key.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

impl ConfigError {
    /// Environment key the error refers to.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Missing { key } | Self::InvalidValue { key, .. } => key,
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
