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

//! Environment-driven configuration for the Hearth orchestrator.
//!
//! # Design
//! - Every setting has a documented key and default; only the database URL is required.
//! - Loading is split from the process environment so tests can feed plain key/value pairs.

pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, ConfigResult};
pub use model::HearthConfig;
