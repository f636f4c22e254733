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

//! Engine-agnostic torrent interfaces, records, and the pure rules the
//! orchestrator applies on top of them.
//!
//! Layout: `model.rs` (records and engine DTOs), `service.rs` (engine and
//! record store traits), `progress.rs` (live/durable progress reconciliation),
//! `lifecycle.rs` (state transition table), `error.rs` (caller-facing errors).

pub mod error;
pub mod lifecycle;
pub mod model;
pub mod progress;
pub mod service;

pub use error::{TorrentError, TorrentResult};
pub use hearth_events::{DiscoveredFile, FileProgress, InfoHash, TorrentState};
pub use model::{
    ClientState, FileState, NewTorrent, SessionHandle, SessionSnapshot, SessionStatus,
    SpeedLimits, TorrentFileRecord, TorrentRecord, TorrentSource, TransferSpeeds,
};
pub use service::{TorrentEngine, TorrentRepository};
