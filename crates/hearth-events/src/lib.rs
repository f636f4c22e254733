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

//! Core event bus and shared torrent identifiers for Hearth.
//!
//! The bus carries the ordered stream of engine and orchestrator events.
//! Internally it uses a bounded `tokio::broadcast` channel; a subscriber that
//! falls behind sees a lag error and skips to the oldest buffered event.
//!
//! Layout: `payloads.rs` (event enum, identifiers, states), `routing.rs`
//! (bus + subscriptions), `error.rs` (identifier parsing failures).

pub mod error;
pub mod payloads;
pub mod routing;

pub use error::{EventsError, EventsResult};
pub use payloads::{
    DEFAULT_BUS_CAPACITY, DiscoveredFile, Event, EventEnvelope, EventId, FileProgress,
    InfoHash, TorrentState,
};
pub use routing::{EventBus, EventStream};
