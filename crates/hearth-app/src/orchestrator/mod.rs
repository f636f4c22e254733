//! Torrent orchestrator: lifecycle, criticality, speed limits, and progress
//! reconciliation on top of an engine and a record store.
//!
//! # Design
//! - Every mutation (caller commands and engine events alike) runs under one
//!   async lock, so the single-critical-holder invariant and per-torrent
//!   transition order cannot race.
//! - Scheduler state is mirrored in memory and persisted through the record
//!   store before the mirror is updated.
//! - Reads take no async lock: they combine the mirrored scheduler state, the
//!   engine's cached snapshots, and durable records.

mod commands;
mod lifecycle;
mod scheduler;
pub mod view;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use hearth_config::HearthConfig;
use hearth_events::{Event, EventBus, InfoHash, TorrentState};
use hearth_telemetry::Metrics;
use hearth_torrent_core::lifecycle::ends_criticality;
use hearth_torrent_core::progress::{CheckpointClock, real_progress, verified_fraction};
use hearth_torrent_core::{
    ClientState, FileState, TorrentEngine, TorrentError, TorrentFileRecord, TorrentRecord,
    TorrentRepository, TorrentResult, TransferSpeeds,
};

pub use view::{ClientStatus, LIST_PAGE_SIZE, TorrentOverview, TorrentPage};

/// Tunables for [`TorrentOrchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Minimum spacing of periodic progress checkpoints per torrent.
    pub checkpoint_interval: Duration,
    /// Re-attach sessions of unfinished torrents in [`TorrentOrchestrator::start`].
    pub restore_sessions: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            checkpoint_interval: hearth_config::model::DEFAULT_CHECKPOINT_INTERVAL,
            restore_sessions: true,
        }
    }
}

impl From<&HearthConfig> for OrchestratorOptions {
    fn from(config: &HearthConfig) -> Self {
        Self {
            checkpoint_interval: config.checkpoint_interval,
            restore_sessions: config.restore_sessions,
        }
    }
}

/// Coordinates engine sessions, durable records, and scheduler state.
pub struct TorrentOrchestrator<E, R>
where
    E: TorrentEngine + 'static,
    R: TorrentRepository + 'static,
{
    engine: Arc<E>,
    store: Arc<R>,
    events: EventBus,
    metrics: Metrics,
    client: RwLock<ClientState>,
    ops: tokio::sync::Mutex<()>,
    checkpoints: Mutex<CheckpointClock>,
    options: OrchestratorOptions,
}

impl<E, R> TorrentOrchestrator<E, R>
where
    E: TorrentEngine + 'static,
    R: TorrentRepository + 'static,
{
    /// Build an orchestrator with empty scheduler state.
    ///
    /// Call [`Self::start`] to hydrate persisted state and consume engine
    /// events.
    #[must_use]
    pub fn new(
        engine: Arc<E>,
        store: Arc<R>,
        events: EventBus,
        metrics: Metrics,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            engine,
            store,
            events,
            metrics,
            client: RwLock::new(ClientState::default()),
            ops: tokio::sync::Mutex::new(()),
            checkpoints: Mutex::new(CheckpointClock::new(options.checkpoint_interval)),
            options,
        }
    }

    /// Hydrate scheduler state, re-attach unfinished torrents, reconcile
    /// sessions, and spawn the engine event consumer.
    ///
    /// The consumer subscribes before any session is touched so no event
    /// published during startup is missed.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Storage`] when persisted state cannot be read.
    pub async fn start(self: &Arc<Self>) -> TorrentResult<JoinHandle<()>> {
        let stream = self.events.subscribe();
        {
            let _guard = self.ops.lock().await;
            let mut state = self
                .store
                .load_client_state()
                .await
                .storage("load_client_state")?;
            if let Some(holder) = state.critical.clone() {
                let record = self.store.torrent(&holder).await.storage("load_client_state")?;
                if record.is_none_or(|record| ends_criticality(record.state)) {
                    warn!(info_hash = %holder, "dropping stale critical designation");
                    state.critical = None;
                    self.store
                        .save_client_state(&state)
                        .await
                        .storage("save_client_state")?;
                }
            }
            *self.client_write() = state.clone();

            if let Err(err) = self.engine.apply_limits(state.limits()).await {
                self.metrics.inc_engine_error();
                let detail = format!("{err:#}");
                warn!(error = %detail, "failed to apply persisted speed limits");
            }
            if self.options.restore_sessions {
                self.restore_sessions().await?;
            }
            self.reconcile().await;
            let state = self.get_state();
            self.publish_scheduler(&state);
            info!(
                paused = state.paused,
                critical = ?state.critical.as_ref().map(InfoHash::as_str),
                "torrent orchestrator started"
            );
        }
        Ok(self.spawn_consumer(stream))
    }

    /// Current scheduler state.
    #[must_use]
    pub fn get_state(&self) -> ClientState {
        self.client_read().clone()
    }

    /// Aggregate transfer rates from the engine's last poll.
    #[must_use]
    pub fn speeds(&self) -> TransferSpeeds {
        let speeds = self.engine.session_speeds();
        self.metrics
            .set_transfer_rates(speeds.download_bps, speeds.upload_bps);
        speeds
    }

    /// Aggregate download rate in bytes per second.
    #[must_use]
    pub fn get_download_speed(&self) -> u64 {
        self.speeds().download_bps
    }

    /// Aggregate upload rate in bytes per second.
    #[must_use]
    pub fn get_upload_speed(&self) -> u64 {
        self.speeds().upload_bps
    }

    /// Authoritative progress of a torrent: `1.0` once finished, otherwise
    /// the max of the durable checkpoint and the cached live value.
    #[must_use]
    pub fn get_real_progress(&self, record: &TorrentRecord) -> f64 {
        if record.state == TorrentState::Finished {
            return 1.0;
        }
        real_progress(
            record.progress,
            self.engine.session_progress(&record.info_hash),
        )
    }

    /// Authoritative progress of a single file.
    #[must_use]
    pub fn get_file_real_progress(&self, file: &TorrentFileRecord) -> f64 {
        if file.state == FileState::Finished {
            return 1.0;
        }
        let live = self
            .engine
            .session(&file.info_hash)
            .and_then(|snapshot| snapshot.file_progress(&file.path));
        real_progress(file.progress, live)
    }

    /// Fetch one torrent with its reconciled progress.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::NotFound`] for unknown hashes.
    pub async fn torrent(&self, info_hash: &InfoHash) -> TorrentResult<TorrentOverview> {
        let record = self.require(info_hash, "torrent").await?;
        Ok(self.overview(record))
    }

    /// Files of a torrent ordered by path.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::NotFound`] for unknown hashes.
    pub async fn torrent_files(&self, info_hash: &InfoHash) -> TorrentResult<Vec<TorrentFileRecord>> {
        self.require(info_hash, "torrent_files").await?;
        self.store.files(info_hash).await.storage("torrent_files")
    }

    /// Fetch one file record.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::FileNotFound`] for unknown ids.
    pub async fn file(&self, file_id: i64) -> TorrentResult<TorrentFileRecord> {
        self.store
            .file(file_id)
            .await
            .storage("file")?
            .ok_or(TorrentError::FileNotFound { file_id })
    }

    /// One page of the torrent listing, newest first within each state rank.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Storage`] when the listing cannot be read.
    pub async fn list_torrents(&self, page: usize) -> TorrentResult<TorrentPage> {
        let records = self.store.list_torrents(&[]).await.storage("list_torrents")?;
        let (records, has_more) = view::paginate(records, page);
        Ok(TorrentPage {
            page,
            items: records.into_iter().map(|record| self.overview(record)).collect(),
            has_more,
        })
    }

    /// Scheduler state, rates, total size, and every torrent still in flight.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Storage`] when records cannot be read.
    pub async fn status(&self) -> TorrentResult<ClientStatus> {
        let total_size_bytes = self.store.total_size().await.storage("status")?;
        let active = self
            .store
            .list_torrents(&[
                TorrentState::Queued,
                TorrentState::Verifying,
                TorrentState::Downloading,
            ])
            .await
            .storage("status")?;
        Ok(ClientStatus {
            state: self.get_state(),
            speeds: self.speeds(),
            total_size_bytes,
            active: active.into_iter().map(|record| self.overview(record)).collect(),
        })
    }

    fn overview(&self, record: TorrentRecord) -> TorrentOverview {
        let real_progress = self.get_real_progress(&record);
        let verified_fraction = (record.state == TorrentState::Verifying).then(|| {
            verified_fraction(
                record.progress,
                self.engine
                    .session_progress(&record.info_hash)
                    .unwrap_or(0.0),
            )
        });
        let critical = self.client_read().is_critical(&record.info_hash);
        TorrentOverview {
            record,
            real_progress,
            verified_fraction,
            critical,
        }
    }

    async fn require(
        &self,
        info_hash: &InfoHash,
        operation: &'static str,
    ) -> TorrentResult<TorrentRecord> {
        self.store
            .torrent(info_hash)
            .await
            .storage(operation)?
            .ok_or_else(|| TorrentError::NotFound {
                info_hash: info_hash.clone(),
            })
    }

    /// Persist scheduler state, then mirror and announce it.
    async fn commit_client(
        &self,
        operation: &'static str,
        state: ClientState,
    ) -> TorrentResult<()> {
        self.store
            .save_client_state(&state)
            .await
            .storage(operation)?;
        self.publish_scheduler(&state);
        *self.client_write() = state;
        Ok(())
    }

    fn publish_scheduler(&self, state: &ClientState) {
        let _ = self.events.publish(Event::SchedulerChanged {
            paused: state.paused,
            critical: state.critical.clone(),
            download_limit_bps: state.download_limit_bps,
            upload_limit_bps: state.upload_limit_bps,
        });
    }

    fn client_read(&self) -> std::sync::RwLockReadGuard<'_, ClientState> {
        self.client.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn client_write(&self) -> std::sync::RwLockWriteGuard<'_, ClientState> {
        self.client.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn clock(&self) -> MutexGuard<'_, CheckpointClock> {
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps record store failures into [`TorrentError::Storage`].
trait StoreResultExt<T> {
    fn storage(self, operation: &'static str) -> TorrentResult<T>;
}

impl<T> StoreResultExt<T> for anyhow::Result<T> {
    fn storage(self, operation: &'static str) -> TorrentResult<T> {
        self.map_err(|err| TorrentError::storage(operation, err))
    }
}
