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

//! Hearth torrent orchestrator and application bootstrap.
//!
//! Layout: `orchestrator/` (lifecycle, scheduling, read models), `limits.rs`
//! (speed limit parsing), `bootstrap.rs` (service wiring), `error.rs`.

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application-level errors.
pub mod error;
/// Speed limit input parsing.
pub mod limits;
/// Torrent orchestrator.
pub mod orchestrator;

pub use bootstrap::{
    AppOrchestrator, run_app, run_app_with, start_services, start_services_with_session,
};
pub use error::{AppError, AppResult};
pub use limits::{SpeedLimitError, UNLIMITED, parse_speed_limit};
pub use orchestrator::{
    ClientStatus, LIST_PAGE_SIZE, OrchestratorOptions, TorrentOrchestrator, TorrentOverview,
    TorrentPage,
};
