//! Typed configuration consumed by the application bootstrap.

use std::path::PathBuf;
use std::time::Duration;

use hearth_telemetry::{LogFormat, LoggingConfig};

/// Default download root.
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
/// Default spacing of periodic progress checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);
/// Default engine poll interval.
pub const DEFAULT_ENGINE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default bound on attaching one engine session.
pub const DEFAULT_ENGINE_ADD_TIMEOUT: Duration = Duration::from_secs(60);

/// Validated runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HearthConfig {
    /// SQLite URL for the record store.
    pub database_url: String,
    /// Shared download root; each torrent lives in `<root>/<info_hash>/`.
    pub download_dir: PathBuf,
    /// Minimum spacing of periodic durable progress checkpoints.
    pub checkpoint_interval: Duration,
    /// Engine worker poll interval.
    pub engine_poll_interval: Duration,
    /// Bound on a single engine add, magnet metadata resolution included.
    pub engine_add_timeout: Duration,
    /// Re-attach non-finished torrents at startup.
    pub restore_sessions: bool,
    /// `EnvFilter` directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl HearthConfig {
    /// Configuration with defaults for everything but the database URL.
    #[must_use]
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            engine_poll_interval: DEFAULT_ENGINE_POLL_INTERVAL,
            engine_add_timeout: DEFAULT_ENGINE_ADD_TIMEOUT,
            restore_sessions: true,
            log_level: hearth_telemetry::DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::infer(),
        }
    }

    /// Logging settings for [`hearth_telemetry::init_logging`].
    #[must_use]
    pub fn logging<'a>(&'a self, build_sha: &'a str) -> LoggingConfig<'a> {
        LoggingConfig {
            level: &self.log_level,
            format: self.log_format,
            build_sha,
        }
    }
}
