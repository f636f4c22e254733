//! Error types for torrent orchestration.

use std::error::Error;

use thiserror::Error;

use hearth_events::{InfoHash, TorrentState};

/// Caller-facing error for torrent operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// No torrent with the given info hash is known.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent identifier.
        info_hash: InfoHash,
    },
    /// No torrent file with the given id is known.
    #[error("torrent file not found")]
    FileNotFound {
        /// Missing file identifier.
        file_id: i64,
    },
    /// The engine rejected the request.
    #[error("torrent engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Engine-supplied failure detail.
        message: String,
    },
    /// The torrent's current state does not allow the operation.
    #[error("operation not allowed in current torrent state")]
    InvalidState {
        /// Operation identifier.
        operation: &'static str,
        /// Torrent the operation targeted.
        info_hash: InfoHash,
        /// State observed when the operation was rejected.
        state: TorrentState,
    },
    /// The single-holder criticality invariant was violated.
    #[error("conflicting critical torrent")]
    ConflictingCritical {
        /// Torrent currently holding the designation.
        holder: Option<InfoHash>,
        /// Torrent the operation tried to designate.
        requested: InfoHash,
    },
    /// The record store failed.
    #[error("torrent storage operation failed")]
    Storage {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl TorrentError {
    /// Wrap a record store failure.
    pub fn storage(operation: &'static str, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Storage {
            operation,
            source: source.into(),
        }
    }

    /// Capture an engine failure, keeping the full cause chain as the message.
    #[must_use]
    pub fn engine(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Engine {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Engine-supplied detail, when this error came from the engine.
    #[must_use]
    pub fn engine_message(&self) -> Option<&str> {
        match self {
            Self::Engine { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Convenience alias for torrent operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn engine_error_keeps_cause_chain() {
        let err = anyhow!("tracker unreachable").context("add session");
        let wrapped = TorrentError::engine("add_torrent", &err);
        assert_eq!(wrapped.to_string(), "torrent engine operation failed");
        assert_eq!(
            wrapped.engine_message(),
            Some("add session: tracker unreachable")
        );
    }

    #[test]
    fn storage_error_exposes_source() {
        let err = TorrentError::storage("load_torrent", anyhow!("database is locked"));
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("database is locked"));
        assert!(err.engine_message().is_none());
    }
}
