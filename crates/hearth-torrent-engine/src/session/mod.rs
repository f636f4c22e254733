//! Engine sessions driven by the worker.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use hearth_events::InfoHash;
use hearth_torrent_core::{SessionHandle, SessionSnapshot, SpeedLimits, TorrentSource};

#[cfg(feature = "rqbit")]
mod native;
mod stub;

pub use stub::StubSession;

/// Session surface the worker drives. Implementations own all peer-to-peer
/// I/O; the worker owns scheduling and event derivation.
#[async_trait]
pub trait EngineSession: Send {
    /// Begin or attach to a session; re-adding known content returns the
    /// existing handle.
    async fn add(&mut self, source: &TorrentSource) -> Result<SessionHandle>;
    /// Detach a session from bandwidth consumption.
    async fn pause(&mut self, info_hash: &InfoHash) -> Result<()>;
    /// Reattach a paused session.
    async fn resume(&mut self, info_hash: &InfoHash) -> Result<()>;
    /// Tear down a session. Returns whether one existed.
    async fn remove(&mut self, info_hash: &InfoHash, delete_files: bool) -> Result<bool>;
    /// Apply global transfer caps.
    async fn apply_limits(&mut self, limits: &SpeedLimits) -> Result<()>;
    /// Current view of every session.
    async fn poll(&mut self) -> Result<Vec<SessionSnapshot>>;
}

/// Build the session for this build: librqbit with the `rqbit` feature,
/// the in-memory stub otherwise.
#[cfg_attr(not(feature = "rqbit"), allow(clippy::unused_async))]
pub(crate) async fn create_session(download_root: &Path) -> Result<Box<dyn EngineSession>> {
    #[cfg(feature = "rqbit")]
    {
        native::create_session(download_root).await
    }

    #[cfg(not(feature = "rqbit"))]
    {
        let _ = download_root;
        Ok(Box::new(StubSession::default()))
    }
}
