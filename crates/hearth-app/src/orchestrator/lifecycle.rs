//! Engine event handling: lifecycle transitions, metadata, and durable
//! progress checkpoints.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, error, info, warn};

use hearth_events::{DiscoveredFile, Event, EventStream, FileProgress, InfoHash, TorrentState};
use hearth_torrent_core::lifecycle::{ends_criticality, engine_can_transition};
use hearth_torrent_core::progress::fraction;
use hearth_torrent_core::{
    FileState, SessionSnapshot, SessionStatus, TorrentEngine, TorrentRecord, TorrentRepository,
    TorrentResult,
};

use super::{StoreResultExt, TorrentOrchestrator};

/// States whose torrents keep an engine session attached.
pub(super) const SESSION_STATES: [TorrentState; 4] = [
    TorrentState::Queued,
    TorrentState::Verifying,
    TorrentState::Downloading,
    TorrentState::Paused,
];

impl<E, R> TorrentOrchestrator<E, R>
where
    E: TorrentEngine + 'static,
    R: TorrentRepository + 'static,
{
    /// Apply one engine event to the durable records.
    ///
    /// Events the orchestrator publishes itself, and events for torrents it
    /// does not know, are ignored. Engine-driven transitions outside the
    /// lifecycle table are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`hearth_torrent_core::TorrentError::Storage`] when a record
    /// cannot be updated.
    pub async fn handle_event(&self, event: &Event) -> TorrentResult<()> {
        if !is_engine_event(event) {
            return Ok(());
        }
        let Some(info_hash) = event.info_hash() else {
            return Ok(());
        };
        let _guard = self.ops.lock().await;
        self.metrics.inc_event(event.kind());
        let Some(record) = self.store.torrent(info_hash).await.storage("handle_event")? else {
            debug!(info_hash = %info_hash, kind = event.kind(), "event for unknown torrent ignored");
            return Ok(());
        };
        self.apply_event(&record, event).await
    }

    /// Rebuild durable state from the engine's cached snapshots.
    ///
    /// Engine events are edge-triggered, so once the consumer lags a dropped
    /// completion or failure is never repeated. Every torrent with an
    /// attached session gets a progress checkpoint, then the events its
    /// current snapshot implies.
    ///
    /// # Errors
    ///
    /// Returns [`hearth_torrent_core::TorrentError::Storage`] when a record
    /// cannot be read or updated.
    pub async fn resync(&self) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let records = self
            .store
            .list_torrents(&SESSION_STATES)
            .await
            .storage("resync")?;
        let mut applied = 0_usize;
        for record in records {
            let Some(snapshot) = self.engine.session(&record.info_hash) else {
                continue;
            };
            if let Some(total) = snapshot.total_bytes {
                self.periodic_checkpoint(
                    &record.info_hash,
                    snapshot.downloaded_bytes,
                    total,
                    &snapshot.files,
                )
                .await?;
            }
            for event in implied_events(record.state, &snapshot) {
                // Each applied event may move the record on.
                let Some(current) = self
                    .store
                    .torrent(&record.info_hash)
                    .await
                    .storage("resync")?
                else {
                    break;
                };
                self.apply_event(&current, &event).await?;
                applied += 1;
            }
        }
        info!(applied, "engine state resynchronised");
        self.reconcile().await;
        Ok(())
    }

    async fn apply_event(&self, record: &TorrentRecord, event: &Event) -> TorrentResult<()> {
        let info_hash = &record.info_hash;
        match event {
            Event::MetadataResolved {
                name,
                size_bytes,
                files,
                ..
            } => {
                self.store
                    .update_metadata(info_hash, name.as_deref(), Some(*size_bytes))
                    .await
                    .storage("metadata_resolved")?;
                self.store
                    .upsert_files(info_hash, files)
                    .await
                    .storage("metadata_resolved")?;
                debug!(info_hash = %info_hash, files = files.len(), "torrent metadata recorded");
                Ok(())
            }
            Event::VerificationStarted { .. } => {
                if record.progress > 0.0 {
                    self.engine_transition(record, TorrentState::Verifying, None)
                        .await
                } else {
                    debug!(info_hash = %info_hash, "nothing recorded to verify");
                    Ok(())
                }
            }
            Event::VerificationCompleted {
                verified_bytes,
                total_bytes,
                ..
            } => {
                if let Some(verified) = fraction(*verified_bytes, *total_bytes) {
                    self.checkpoint(info_hash, verified).await?;
                }
                if *total_bytes > 0 && verified_bytes >= total_bytes {
                    self.finish(record).await
                } else {
                    self.engine_transition(record, TorrentState::Downloading, None)
                        .await
                }
            }
            Event::DownloadStarted { .. } => {
                self.engine_transition(record, TorrentState::Downloading, None)
                    .await
            }
            Event::Progress {
                downloaded_bytes,
                total_bytes,
                files,
                ..
            } => {
                let due = self.clock().due(info_hash, Instant::now());
                if due {
                    self.periodic_checkpoint(info_hash, *downloaded_bytes, *total_bytes, files)
                        .await?;
                }
                Ok(())
            }
            Event::FileCompleted { path, .. } => {
                self.store
                    .mark_file_finished(info_hash, path)
                    .await
                    .storage("file_completed")?;
                if let Some(live) = self.engine.session_progress(info_hash) {
                    self.checkpoint(info_hash, live).await?;
                }
                info!(info_hash = %info_hash, path = %path, "torrent file finished");
                Ok(())
            }
            Event::DownloadCompleted { .. } => self.finish(record).await,
            Event::SessionFailed { message, .. } => {
                self.metrics.inc_engine_error();
                error!(info_hash = %info_hash, error = %message, "engine reported session failure");
                self.engine_transition(record, TorrentState::Error, Some(message.as_str()))
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Persist a transition, announce it, and drop criticality on terminal
    /// states. Callers check the transition is allowed.
    pub(super) async fn apply_transition(
        &self,
        record: &TorrentRecord,
        to: TorrentState,
        error_message: Option<&str>,
    ) -> TorrentResult<()> {
        self.store
            .update_state(&record.info_hash, to, error_message)
            .await
            .storage("update_state")?;
        let _ = self.events.publish(Event::StateChanged {
            info_hash: record.info_hash.clone(),
            from: record.state,
            to,
        });
        info!(info_hash = %record.info_hash, from = %record.state, to = %to, "torrent state changed");

        if ends_criticality(to) {
            let mut client = self.get_state();
            if client.is_critical(&record.info_hash) {
                client.critical = None;
                self.commit_client("update_state", client).await?;
                info!(info_hash = %record.info_hash, "critical designation released");
            }
        }
        Ok(())
    }

    async fn engine_transition(
        &self,
        record: &TorrentRecord,
        to: TorrentState,
        error_message: Option<&str>,
    ) -> TorrentResult<()> {
        if record.state == to {
            return Ok(());
        }
        if !engine_can_transition(record.state, to) {
            warn!(
                info_hash = %record.info_hash,
                from = %record.state,
                to = %to,
                "ignoring engine transition outside the lifecycle table"
            );
            return Ok(());
        }
        self.apply_transition(record, to, error_message).await?;
        self.reconcile().await;
        Ok(())
    }

    async fn finish(&self, record: &TorrentRecord) -> TorrentResult<()> {
        if record.state == TorrentState::Finished {
            return Ok(());
        }
        if !engine_can_transition(record.state, TorrentState::Finished) {
            warn!(info_hash = %record.info_hash, from = %record.state, "ignoring completion report");
            return Ok(());
        }
        self.checkpoint(&record.info_hash, 1.0).await?;
        let files = self
            .store
            .files(&record.info_hash)
            .await
            .storage("download_completed")?;
        for file in files.iter().filter(|file| file.state != FileState::Finished) {
            self.store
                .mark_file_finished(&record.info_hash, &file.path)
                .await
                .storage("download_completed")?;
        }
        self.engine_transition(record, TorrentState::Finished, None)
            .await
    }

    async fn checkpoint(&self, info_hash: &InfoHash, progress: f64) -> TorrentResult<f64> {
        let stored = self
            .store
            .checkpoint_progress(info_hash, progress)
            .await
            .storage("checkpoint_progress")?;
        self.clock().mark(info_hash, Instant::now());
        self.metrics.inc_checkpoint();
        debug!(info_hash = %info_hash, reported = progress, stored, "progress checkpoint");
        Ok(stored)
    }

    async fn periodic_checkpoint(
        &self,
        info_hash: &InfoHash,
        downloaded_bytes: u64,
        total_bytes: u64,
        files: &[FileProgress],
    ) -> TorrentResult<()> {
        if let Some(progress) = fraction(downloaded_bytes, total_bytes) {
            self.checkpoint(info_hash, progress).await?;
        }
        for file in files {
            if let Some(progress) = fraction(file.completed_bytes, file.size_bytes) {
                self.store
                    .checkpoint_file_progress(info_hash, &file.path, progress)
                    .await
                    .storage("checkpoint_file_progress")?;
            }
        }
        Ok(())
    }

    /// Re-attach sessions for unfinished torrents after a restart.
    ///
    /// A torrent whose session cannot be re-added is moved to `Error`.
    pub(super) async fn restore_sessions(&self) -> TorrentResult<()> {
        let records = self
            .store
            .list_torrents(&SESSION_STATES)
            .await
            .storage("restore_sessions")?;
        let mut restored = 0_usize;
        for record in records {
            if self.engine.session(&record.info_hash).is_some() {
                continue;
            }
            match self.engine.add_session(record.source.clone()).await {
                Ok(handle) => {
                    self.record_handle(&record.info_hash, &handle, "restore_sessions")
                        .await?;
                    restored += 1;
                }
                Err(err) => self.capture_failure(&record, &err).await?,
            }
        }
        info!(restored, "engine sessions restored");
        Ok(())
    }

    pub(super) fn spawn_consumer(self: &Arc<Self>, mut stream: EventStream) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(envelope) => {
                        if let Err(err) = orchestrator.handle_event(&envelope.event).await {
                            error!(
                                error = ?err,
                                kind = envelope.event.kind(),
                                "failed to apply engine event"
                            );
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "engine event consumer lagged; resynchronising from engine");
                        if let Err(err) = orchestrator.resync().await {
                            error!(error = ?err, "failed to resynchronise after lag");
                        }
                    }
                }
            }
            debug!("engine event stream closed");
        })
    }
}

/// Engine events a snapshot implies for a torrent recorded in `state`:
/// metadata, completed files, then the status report.
///
/// A user-paused torrent gets no status event, since the engine would only
/// be echoing a state the user already overrode.
fn implied_events(state: TorrentState, snapshot: &SessionSnapshot) -> Vec<Event> {
    let info_hash = &snapshot.info_hash;
    let mut events = Vec::new();
    if let Some(total) = snapshot.total_bytes {
        events.push(Event::MetadataResolved {
            info_hash: info_hash.clone(),
            name: snapshot.name.clone(),
            size_bytes: total,
            files: snapshot
                .files
                .iter()
                .map(|file| DiscoveredFile {
                    path: file.path.clone(),
                    size_bytes: file.size_bytes,
                })
                .collect(),
        });
    }
    events.extend(
        snapshot
            .files
            .iter()
            .filter(|file| file.completed_bytes >= file.size_bytes)
            .map(|file| Event::FileCompleted {
                info_hash: info_hash.clone(),
                path: file.path.clone(),
            }),
    );
    if state == TorrentState::Paused {
        return events;
    }

    let verification_completed = || Event::VerificationCompleted {
        info_hash: info_hash.clone(),
        verified_bytes: snapshot.downloaded_bytes,
        total_bytes: snapshot.total_bytes.unwrap_or_default(),
    };
    let status = match &snapshot.status {
        SessionStatus::Checking => Some(Event::VerificationStarted {
            info_hash: info_hash.clone(),
        }),
        SessionStatus::Downloading if state == TorrentState::Verifying => {
            Some(verification_completed())
        }
        SessionStatus::Downloading => Some(Event::DownloadStarted {
            info_hash: info_hash.clone(),
        }),
        SessionStatus::Seeding if state == TorrentState::Verifying => {
            Some(verification_completed())
        }
        SessionStatus::Seeding => Some(Event::DownloadCompleted {
            info_hash: info_hash.clone(),
        }),
        SessionStatus::Failed { message } => Some(Event::SessionFailed {
            info_hash: info_hash.clone(),
            message: message.clone(),
        }),
        SessionStatus::Resolving | SessionStatus::Paused => None,
    };
    events.extend(status);
    events
}

/// Events the engine adapter publishes; everything else originates here.
const fn is_engine_event(event: &Event) -> bool {
    matches!(
        event,
        Event::MetadataResolved { .. }
            | Event::VerificationStarted { .. }
            | Event::VerificationCompleted { .. }
            | Event::DownloadStarted { .. }
            | Event::Progress { .. }
            | Event::FileCompleted { .. }
            | Event::DownloadCompleted { .. }
            | Event::SessionFailed { .. }
    )
}
