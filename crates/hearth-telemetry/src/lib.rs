#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Logging and metrics shared across the Hearth workspace.

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{Result as TelemetryResult, TelemetryError};
pub use init::{
    AppSpanGuard, DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging,
};
pub use metrics::{Metrics, MetricsSnapshot};
