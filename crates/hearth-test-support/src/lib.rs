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

//! Shared test helpers used across integration suites.
//! Layout: `fixtures.rs` (identifiers, sources, event waits), `engine.rs` (in-memory fake engine).

pub mod engine;
pub mod fixtures;

pub use engine::{EngineCall, FakeEngine};
