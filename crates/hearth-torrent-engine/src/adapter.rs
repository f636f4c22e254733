//! Public engine handle backed by the background worker.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use hearth_events::{EventBus, InfoHash};
use hearth_torrent_core::{
    SessionHandle, SessionSnapshot, SpeedLimits, TorrentEngine, TorrentSource, TransferSpeeds,
};

use crate::cache::SnapshotCache;
use crate::command::{EngineCommand, Reply};
use crate::error::EngineError;
use crate::session::{self, EngineSession};
use crate::worker;

const COMMAND_BUFFER: usize = 128;

/// Runtime options for the engine worker.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Shared download root; each torrent lives in `<root>/<info_hash>/`.
    pub download_root: PathBuf,
    /// Interval between session polls.
    pub poll_interval: Duration,
    /// Upper bound on a single session add, including magnet metadata
    /// resolution.
    pub add_timeout: Duration,
}

/// Engine adapter that forwards commands to a worker owning the session and
/// serves reads from the worker's last poll.
#[derive(Clone)]
pub struct SessionEngine {
    commands: mpsc::Sender<EngineCommand>,
    cache: SnapshotCache,
}

impl SessionEngine {
    /// Start the engine with the session selected for this build.
    ///
    /// # Errors
    ///
    /// Returns an error if the download root cannot be created or the
    /// session fails to initialise.
    pub async fn start(events: EventBus, options: EngineOptions) -> Result<Self> {
        create_download_root(&options).await?;
        let session = session::create_session(&options.download_root)
            .await
            .context("failed to initialise engine session")?;
        Ok(Self::with_session(events, options, session))
    }

    /// Start the engine around an explicit session, creating the download
    /// root first.
    ///
    /// # Errors
    ///
    /// Returns an error if the download root cannot be created.
    pub async fn start_with_session(
        events: EventBus,
        options: EngineOptions,
        session: Box<dyn EngineSession>,
    ) -> Result<Self> {
        create_download_root(&options).await?;
        Ok(Self::with_session(events, options, session))
    }

    /// Start the engine around an explicit session.
    #[must_use]
    pub fn with_session(
        events: EventBus,
        options: EngineOptions,
        session: Box<dyn EngineSession>,
    ) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let cache = SnapshotCache::default();
        worker::spawn(
            events,
            rx,
            session,
            cache.clone(),
            options.download_root,
            options.poll_interval,
            options.add_timeout,
        );
        Self { commands, cache }
    }

    /// Snapshot cache shared with the worker.
    #[must_use]
    pub const fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(Reply<T>) -> EngineCommand,
    ) -> Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(build(respond_to))
            .await
            .map_err(|_| EngineError::CommandChannelClosed { operation })?;
        response
            .await
            .map_err(|_| EngineError::ResponseDropped { operation })?
    }
}

async fn create_download_root(options: &EngineOptions) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(&options.download_root)
        .await
        .map_err(|source| EngineError::Io {
            operation: "create_download_root",
            path: options.download_root.clone(),
            source,
        })
}

#[async_trait]
impl TorrentEngine for SessionEngine {
    async fn add_session(&self, source: TorrentSource) -> Result<SessionHandle> {
        self.request("add_session", |respond_to| EngineCommand::Add {
            source,
            respond_to,
        })
        .await
    }

    fn session(&self, info_hash: &InfoHash) -> Option<SessionSnapshot> {
        self.cache.get(info_hash)
    }

    async fn pause_session(&self, info_hash: &InfoHash) -> Result<()> {
        let info_hash = info_hash.clone();
        self.request("pause_session", |respond_to| EngineCommand::Pause {
            info_hash,
            respond_to,
        })
        .await
    }

    async fn resume_session(&self, info_hash: &InfoHash) -> Result<()> {
        let info_hash = info_hash.clone();
        self.request("resume_session", |respond_to| EngineCommand::Resume {
            info_hash,
            respond_to,
        })
        .await
    }

    async fn remove_session(&self, info_hash: &InfoHash, delete_files: bool) -> Result<()> {
        let info_hash = info_hash.clone();
        self.request("remove_session", |respond_to| EngineCommand::Remove {
            info_hash,
            delete_files,
            respond_to,
        })
        .await
    }

    async fn remove_file(&self, info_hash: &InfoHash, path: &str) -> Result<()> {
        let info_hash = info_hash.clone();
        let path = path.to_string();
        self.request("remove_file", |respond_to| EngineCommand::RemoveFile {
            info_hash,
            path,
            respond_to,
        })
        .await
    }

    async fn apply_limits(&self, limits: SpeedLimits) -> Result<()> {
        self.request("apply_limits", |respond_to| EngineCommand::ApplyLimits {
            limits,
            respond_to,
        })
        .await
    }

    fn session_speeds(&self) -> TransferSpeeds {
        self.cache.speeds()
    }
}
