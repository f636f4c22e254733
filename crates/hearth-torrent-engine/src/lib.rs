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

//! Engine adapter: a command channel in front of a background worker that
//! owns the peer-to-peer session.
//!
//! Layout: `adapter.rs` (public [`SessionEngine`]), `command.rs` (worker
//! commands), `cache.rs` (last polled snapshots), `worker.rs` (command
//! handling, polling, event derivation), `session/` (stub and librqbit
//! sessions), `error.rs` (adapter errors).

pub mod adapter;
pub mod cache;
mod command;
pub mod error;
pub mod session;
mod worker;

pub use adapter::{EngineOptions, SessionEngine};
pub use error::{EngineError, EngineResult};
pub use session::{EngineSession, StubSession};
