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

//! SQLite-backed record store: migrations, row mapping, and the
//! [`hearth_torrent_core::TorrentRepository`] implementation.

pub mod error;
pub mod store;

pub use error::{DataError, Result as DataResult};
pub use store::SqliteTorrentStore;
