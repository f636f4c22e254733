//! # Design
//!
//! - Centralize application-level errors for bootstrap.
//! - Keep error messages constant while carrying context fields for debugging.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: hearth_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: hearth_telemetry::TelemetryError,
    },
    /// The record store could not be opened.
    #[error("record store operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data-layer error.
        source: hearth_data::DataError,
    },
    /// The engine adapter failed to start.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Engine failure detail, including its cause chain.
        message: String,
    },
    /// Torrent orchestration failed.
    #[error("torrent operation failed")]
    Torrent {
        /// Operation identifier.
        operation: &'static str,
        /// Source torrent error.
        source: hearth_torrent_core::TorrentError,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: hearth_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: hearth_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn data(operation: &'static str, source: hearth_data::DataError) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) fn engine(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Engine {
            operation,
            message: format!("{err:#}"),
        }
    }

    pub(crate) const fn torrent(
        operation: &'static str,
        source: hearth_torrent_core::TorrentError,
    ) -> Self {
        Self::Torrent { operation, source }
    }
}
