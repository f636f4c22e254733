//! Commands accepted by the engine worker.

use anyhow::Result;
use tokio::sync::oneshot;

use hearth_events::InfoHash;
use hearth_torrent_core::{SessionHandle, SpeedLimits, TorrentSource};

/// Reply channel carried by every command.
pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub(crate) enum EngineCommand {
    /// Begin or attach to a session.
    Add {
        source: TorrentSource,
        respond_to: Reply<SessionHandle>,
    },
    /// Detach a session from bandwidth consumption.
    Pause {
        info_hash: InfoHash,
        respond_to: Reply<()>,
    },
    /// Reattach a paused session.
    Resume {
        info_hash: InfoHash,
        respond_to: Reply<()>,
    },
    /// Tear down a session and optionally purge its data directory.
    Remove {
        info_hash: InfoHash,
        delete_files: bool,
        respond_to: Reply<()>,
    },
    /// Delete one file below the torrent's data directory.
    RemoveFile {
        info_hash: InfoHash,
        path: String,
        respond_to: Reply<()>,
    },
    /// Apply global transfer caps.
    ApplyLimits {
        limits: SpeedLimits,
        respond_to: Reply<()>,
    },
}

impl EngineCommand {
    pub(crate) const fn operation(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add_session",
            Self::Pause { .. } => "pause_session",
            Self::Resume { .. } => "resume_session",
            Self::Remove { .. } => "remove_session",
            Self::RemoveFile { .. } => "remove_file",
            Self::ApplyLimits { .. } => "apply_limits",
        }
    }
}
