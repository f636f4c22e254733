//! Loading configuration from environment variables.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use hearth_telemetry::LogFormat;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::HearthConfig;

/// Record store URL.
pub const DATABASE_URL: &str = "DATABASE_URL";
/// Download root.
pub const DOWNLOAD_DIR: &str = "HEARTH_DOWNLOAD_DIR";
/// Checkpoint spacing in seconds.
pub const CHECKPOINT_INTERVAL_SECS: &str = "HEARTH_CHECKPOINT_INTERVAL_SECS";
/// Engine poll interval in milliseconds.
pub const ENGINE_POLL_MS: &str = "HEARTH_ENGINE_POLL_MS";
/// Engine add timeout in seconds.
pub const ENGINE_ADD_TIMEOUT_SECS: &str = "HEARTH_ENGINE_ADD_TIMEOUT_SECS";
/// Startup session restore flag.
pub const RESTORE_SESSIONS: &str = "HEARTH_RESTORE_SESSIONS";
/// Log filter directive.
pub const LOG_LEVEL: &str = "HEARTH_LOG_LEVEL";
/// Log output format.
pub const LOG_FORMAT: &str = "HEARTH_LOG_FORMAT";

const CHECKPOINT_RANGE_SECS: RangeInclusive<u64> = 1..=3_600;
const POLL_RANGE_MS: RangeInclusive<u64> = 50..=60_000;
const ADD_TIMEOUT_RANGE_SECS: RangeInclusive<u64> = 1..=3_600;

impl HearthConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or any value is invalid.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from arbitrary key/value pairs.
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or any value is invalid.
    pub fn from_vars<I, K, V>(vars: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .filter(|(_, value)| !value.trim().is_empty())
            .collect();
        let lookup = |key: &str| vars.get(key).map(|value| value.trim());

        let database_url = lookup(DATABASE_URL)
            .ok_or(ConfigError::Missing { key: DATABASE_URL })?
            .to_string();
        let mut config = Self::with_database_url(database_url);

        if let Some(dir) = lookup(DOWNLOAD_DIR) {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(CHECKPOINT_INTERVAL_SECS) {
            let secs = parse_bounded(CHECKPOINT_INTERVAL_SECS, raw, &CHECKPOINT_RANGE_SECS)?;
            config.checkpoint_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup(ENGINE_POLL_MS) {
            let millis = parse_bounded(ENGINE_POLL_MS, raw, &POLL_RANGE_MS)?;
            config.engine_poll_interval = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup(ENGINE_ADD_TIMEOUT_SECS) {
            let secs = parse_bounded(ENGINE_ADD_TIMEOUT_SECS, raw, &ADD_TIMEOUT_RANGE_SECS)?;
            config.engine_add_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup(RESTORE_SESSIONS) {
            config.restore_sessions = parse_flag(RESTORE_SESSIONS, raw)?;
        }
        if let Some(level) = lookup(LOG_LEVEL) {
            config.log_level = level.to_string();
        }
        if let Some(raw) = lookup(LOG_FORMAT) {
            config.log_format = raw
                .parse::<LogFormat>()
                .map_err(|_| invalid(LOG_FORMAT, raw, "must be `json` or `pretty`"))?;
        }

        debug!(
            download_dir = %config.download_dir.display(),
            checkpoint_secs = config.checkpoint_interval.as_secs(),
            poll_ms = u64::try_from(config.engine_poll_interval.as_millis()).unwrap_or(u64::MAX),
            add_timeout_secs = config.engine_add_timeout.as_secs(),
            restore_sessions = config.restore_sessions,
            "configuration loaded"
        );
        Ok(config)
    }
}

fn parse_bounded(key: &'static str, raw: &str, range: &RangeInclusive<u64>) -> ConfigResult<u64> {
    let value = raw
        .parse::<u64>()
        .map_err(|_| invalid(key, raw, "must be a non-negative integer"))?;
    if !range.contains(&value) {
        return Err(invalid(key, raw, "out of range"));
    }
    Ok(value)
}

fn parse_flag(key: &'static str, raw: &str) -> ConfigResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "must be a boolean flag")),
    }
}

fn invalid(key: &'static str, raw: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason,
    }
}
