//! Errors raised while parsing shared identifiers.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Result alias for identifier parsing.
pub type EventsResult<T> = Result<T, EventsError>;

/// Failures surfaced when decoding identifiers that travel on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventsError {
    /// The supplied info hash was empty or contained whitespace.
    InvalidInfoHash {
        /// Raw value that failed validation.
        value: String,
    },
    /// The supplied torrent state label is not recognised.
    UnknownTorrentState {
        /// Raw label that failed to parse.
        value: String,
    },
}

impl EventsError {
    /// Raw value that triggered the failure.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::InvalidInfoHash { value } | Self::UnknownTorrentState { value } => value,
        }
    }
}

impl Display for EventsError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInfoHash { .. } => formatter.write_str("invalid info hash"),
            Self::UnknownTorrentState { .. } => formatter.write_str("unknown torrent state"),
        }
    }
}

impl Error for EventsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_error_exposes_value_without_leaking_it_into_display() {
        let err = EventsError::UnknownTorrentState {
            value: "seeding".into(),
        };

        assert_eq!(err.value(), "seeding");
        assert_eq!(err.to_string(), "unknown torrent state");
    }
}
