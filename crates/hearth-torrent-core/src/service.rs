//! Engine and record store traits consumed by the orchestrator.

use anyhow::bail;
use async_trait::async_trait;

use hearth_events::{DiscoveredFile, InfoHash, TorrentState};

use crate::model::{
    ClientState, NewTorrent, SessionHandle, SessionSnapshot, SpeedLimits, TorrentFileRecord,
    TorrentRecord, TorrentSource, TransferSpeeds,
};

/// Capability-bounded view of the peer-to-peer engine.
///
/// Reads (`session`, `session_progress`, `session_speeds`) return the last
/// polled values and never wait on network I/O.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Begin or attach to a session for the given content.
    async fn add_session(&self, source: TorrentSource) -> anyhow::Result<SessionHandle>;

    /// Last known state of a live session, if the engine has one.
    fn session(&self, info_hash: &InfoHash) -> Option<SessionSnapshot>;

    /// Detach a session from bandwidth consumption.
    async fn pause_session(&self, info_hash: &InfoHash) -> anyhow::Result<()>;

    /// Reattach a paused session.
    async fn resume_session(&self, info_hash: &InfoHash) -> anyhow::Result<()>;

    /// Tear down a session, optionally deleting its on-disk data.
    async fn remove_session(&self, info_hash: &InfoHash, delete_files: bool)
    -> anyhow::Result<()>;

    /// Delete a single file from a torrent's data directory.
    async fn remove_file(&self, info_hash: &InfoHash, path: &str) -> anyhow::Result<()> {
        let _ = (info_hash, path);
        bail!("per-file removal not supported by this engine");
    }

    /// Apply global transfer caps to every session.
    async fn apply_limits(&self, limits: SpeedLimits) -> anyhow::Result<()>;

    /// Instantaneous progress of a live session.
    fn session_progress(&self, info_hash: &InfoHash) -> Option<f64> {
        self.session(info_hash)
            .and_then(|snapshot| snapshot.progress())
    }

    /// Aggregate transfer rates across every session.
    fn session_speeds(&self) -> TransferSpeeds;
}

/// Durable storage for torrents, files, and scheduler state.
#[async_trait]
pub trait TorrentRepository: Send + Sync {
    /// Create a torrent record.
    async fn insert_torrent(&self, torrent: &NewTorrent) -> anyhow::Result<TorrentRecord>;

    /// Fetch a torrent by info hash.
    async fn torrent(&self, info_hash: &InfoHash) -> anyhow::Result<Option<TorrentRecord>>;

    /// List torrents newest first, optionally restricted to some states.
    async fn list_torrents(&self, states: &[TorrentState]) -> anyhow::Result<Vec<TorrentRecord>>;

    /// Record metadata reported by the engine.
    async fn update_metadata(
        &self,
        info_hash: &InfoHash,
        name: Option<&str>,
        size_bytes: Option<u64>,
    ) -> anyhow::Result<()>;

    /// Persist a lifecycle state; the error message is cleared unless given.
    async fn update_state(
        &self,
        info_hash: &InfoHash,
        state: TorrentState,
        error_message: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Store `max(stored, progress)` and return the stored value.
    async fn checkpoint_progress(&self, info_hash: &InfoHash, progress: f64)
    -> anyhow::Result<f64>;

    /// Remove a torrent and its files. Returns whether a row was removed.
    async fn delete_torrent(&self, info_hash: &InfoHash) -> anyhow::Result<bool>;

    /// Sum of all known torrent sizes.
    async fn total_size(&self) -> anyhow::Result<u64>;

    /// Insert files that are not yet recorded; existing rows are kept.
    async fn upsert_files(&self, info_hash: &InfoHash, files: &[DiscoveredFile])
    -> anyhow::Result<()>;

    /// Files of a torrent ordered by path.
    async fn files(&self, info_hash: &InfoHash) -> anyhow::Result<Vec<TorrentFileRecord>>;

    /// Fetch a file by id.
    async fn file(&self, file_id: i64) -> anyhow::Result<Option<TorrentFileRecord>>;

    /// Store `max(stored, progress)` for one file.
    async fn checkpoint_file_progress(
        &self,
        info_hash: &InfoHash,
        path: &str,
        progress: f64,
    ) -> anyhow::Result<()>;

    /// Mark a file finished with full progress.
    async fn mark_file_finished(&self, info_hash: &InfoHash, path: &str) -> anyhow::Result<()>;

    /// Remove one file record. Returns whether a row was removed.
    async fn delete_file(&self, file_id: i64) -> anyhow::Result<bool>;

    /// Load persisted scheduler state; defaults when nothing was saved.
    async fn load_client_state(&self) -> anyhow::Result<ClientState>;

    /// Persist scheduler state.
    async fn save_client_state(&self, state: &ClientState) -> anyhow::Result<()>;
}
