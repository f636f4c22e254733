//! Parsing of user-supplied speed limits.

use thiserror::Error;

/// Token meaning "no limit".
pub const UNLIMITED: &str = "-";

/// A speed limit string was neither `-` nor a byte rate.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid speed limit")]
pub struct SpeedLimitError {
    /// Offending input.
    pub value: String,
}

/// Parse a speed limit in bytes per second.
///
/// `-` or an empty string means unlimited (`None`). Zero is accepted and
/// treated as unlimited by the orchestrator.
///
/// # Errors
///
/// Returns an error if the value is not `-` or a non-negative integer.
pub fn parse_speed_limit(raw: &str) -> Result<Option<u64>, SpeedLimitError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == UNLIMITED {
        return Ok(None);
    }
    trimmed
        .replace('_', "")
        .parse::<u64>()
        .map(Some)
        .map_err(|_| SpeedLimitError {
            value: raw.to_string(),
        })
}
