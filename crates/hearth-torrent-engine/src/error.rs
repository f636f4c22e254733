//! # Design
//!
//! - Keep error messages constant; store operational context in fields.
//! - Sessions and the worker return `anyhow::Result`; these variants are the
//!   typed roots wrapped inside it.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use hearth_events::InfoHash;

/// Result alias for adapter-internal operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures raised by the engine adapter itself (as opposed to the engine).
#[derive(Debug)]
pub enum EngineError {
    /// The background worker is gone.
    CommandChannelClosed {
        /// Operation that could not be enqueued.
        operation: &'static str,
    },
    /// The worker dropped the response channel.
    ResponseDropped {
        /// Operation whose reply was lost.
        operation: &'static str,
    },
    /// The engine has no session for the torrent.
    UnknownSession {
        /// Torrent identifier.
        info_hash: InfoHash,
    },
    /// The source cannot be admitted.
    InvalidSource {
        /// Static reason describing the rejection.
        reason: &'static str,
    },
    /// The session did not attach within the configured bound.
    AddTimedOut {
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// A file path would escape the torrent's data directory.
    UnsafePath {
        /// Offending relative path.
        path: String,
    },
    /// Filesystem access failed.
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

impl Display for EngineError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandChannelClosed { .. } => formatter.write_str("engine worker unavailable"),
            Self::ResponseDropped { .. } => formatter.write_str("engine worker dropped response"),
            Self::UnknownSession { .. } => formatter.write_str("engine session not found"),
            Self::InvalidSource { reason } => {
                write!(formatter, "invalid torrent source: {reason}")
            }
            Self::AddTimedOut { .. } => formatter.write_str("engine timed out attaching session"),
            Self::UnsafePath { .. } => formatter.write_str("file path escapes torrent directory"),
            Self::Io { .. } => formatter.write_str("engine filesystem operation failed"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_exposes_source() {
        let err = EngineError::Io {
            operation: "remove_file",
            path: PathBuf::from("/downloads/abc/a.bin"),
            source: std::io::Error::other("read-only filesystem"),
        };
        assert_eq!(err.to_string(), "engine filesystem operation failed");
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("read-only filesystem")
        );
    }

    #[test]
    fn invalid_source_reason_is_static_context() {
        let err = EngineError::InvalidSource {
            reason: "magnet link has no btih info hash",
        };
        assert_eq!(
            err.to_string(),
            "invalid torrent source: magnet link has no btih info hash"
        );
        assert!(err.source().is_none());
    }
}
