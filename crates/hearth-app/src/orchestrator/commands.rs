//! Caller-facing mutations. Each one holds the operation lock and ends by
//! reconciling engine sessions against the scheduling rule.

use tracing::{debug, error, info, warn};

use hearth_events::{Event, InfoHash, TorrentState};
use hearth_torrent_core::lifecycle::{ends_criticality, is_schedulable, keeps_session};
use hearth_torrent_core::{
    ClientState, FileState, NewTorrent, SessionHandle, TorrentEngine, TorrentError, TorrentRecord,
    TorrentRepository, TorrentResult, TorrentSource,
};

use super::{StoreResultExt, TorrentOrchestrator, TorrentOverview};

impl<E, R> TorrentOrchestrator<E, R>
where
    E: TorrentEngine + 'static,
    R: TorrentRepository + 'static,
{
    /// Admit a torrent from a magnet link or metainfo payload.
    ///
    /// Re-adding known content returns the existing record. When the engine
    /// rejects a magnet whose hash is known up front, the failure is recorded
    /// on an `Error` record instead of being returned.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Engine`] when the engine rejects a payload
    /// whose hash cannot be derived, and [`TorrentError::Storage`] on record
    /// store failures.
    pub async fn add_torrent(&self, source: TorrentSource) -> TorrentResult<TorrentOverview> {
        let _guard = self.ops.lock().await;
        let hint = source.info_hash_hint();
        if let Some(hash) = &hint
            && let Some(existing) = self.store.torrent(hash).await.storage("add_torrent")?
        {
            debug!(info_hash = %hash, "torrent already known; returning existing record");
            return Ok(self.overview(existing));
        }

        let handle = match self.engine.add_session(source.clone()).await {
            Ok(handle) => handle,
            Err(err) => {
                self.metrics.inc_engine_error();
                let Some(info_hash) = hint else {
                    return Err(TorrentError::engine("add_torrent", &err));
                };
                let message = format!("{err:#}");
                error!(info_hash = %info_hash, error = %message, "engine rejected torrent");
                let record = self
                    .store
                    .insert_torrent(&NewTorrent {
                        info_hash,
                        name: None,
                        size_bytes: None,
                        state: TorrentState::Error,
                        error_message: Some(message),
                        source,
                    })
                    .await
                    .storage("add_torrent")?;
                self.announce_added(&record);
                return Ok(self.overview(record));
            }
        };

        if let Some(existing) = self
            .store
            .torrent(&handle.info_hash)
            .await
            .storage("add_torrent")?
        {
            debug!(info_hash = %handle.info_hash, "torrent already known; returning existing record");
            if !keeps_session(existing.state)
                && let Err(err) = self.engine.remove_session(&handle.info_hash, false).await
            {
                let detail = format!("{err:#}");
                warn!(info_hash = %handle.info_hash, error = %detail, "failed to detach duplicate session");
            }
            self.reconcile().await;
            return Ok(self.overview(existing));
        }

        let record = self
            .store
            .insert_torrent(&NewTorrent {
                info_hash: handle.info_hash.clone(),
                name: handle.name.clone(),
                size_bytes: handle.size_bytes,
                state: TorrentState::Queued,
                error_message: None,
                source,
            })
            .await
            .storage("add_torrent")?;
        if !handle.files.is_empty() {
            self.store
                .upsert_files(&handle.info_hash, &handle.files)
                .await
                .storage("add_torrent")?;
        }
        self.announce_added(&record);
        self.reconcile().await;
        Ok(self.overview(record))
    }

    /// Remove a torrent, its files, its on-disk data, and its session.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::NotFound`] for unknown hashes and
    /// [`TorrentError::Engine`] when the engine cannot tear the session down;
    /// the record is kept in that case.
    pub async fn delete_torrent(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let record = self.require(info_hash, "delete_torrent").await?;
        self.engine
            .remove_session(info_hash, true)
            .await
            .map_err(|err| self.engine_failure("delete_torrent", &err))?;
        self.store
            .delete_torrent(info_hash)
            .await
            .storage("delete_torrent")?;
        self.clock().forget(info_hash);

        let mut client = self.get_state();
        if client.is_critical(info_hash) {
            client.critical = None;
            self.commit_client("delete_torrent", client).await?;
        }
        let _ = self.events.publish(Event::TorrentRemoved {
            info_hash: info_hash.clone(),
        });
        info!(info_hash = %info_hash, state = %record.state, "torrent deleted");
        self.reconcile().await;
        Ok(())
    }

    /// Remove one finished file and its on-disk data.
    ///
    /// The owning torrent's state and its other files are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::FileNotFound`] for unknown ids and
    /// [`TorrentError::InvalidState`] while the file is still downloading.
    pub async fn delete_file(&self, file_id: i64) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let file = self.file(file_id).await?;
        if file.state != FileState::Finished {
            let owner = self.require(&file.info_hash, "delete_file").await?;
            return Err(TorrentError::InvalidState {
                operation: "delete_file",
                info_hash: file.info_hash,
                state: owner.state,
            });
        }
        self.engine
            .remove_file(&file.info_hash, &file.path)
            .await
            .map_err(|err| self.engine_failure("delete_file", &err))?;
        self.store.delete_file(file_id).await.storage("delete_file")?;
        let _ = self.events.publish(Event::FileRemoved {
            info_hash: file.info_hash.clone(),
            path: file.path.clone(),
        });
        info!(info_hash = %file.info_hash, path = %file.path, "torrent file deleted");
        Ok(())
    }

    /// Pause every session except the critical one.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Storage`] when the flag cannot be persisted.
    pub async fn pause(&self) -> TorrentResult<()> {
        self.set_global_pause(true).await
    }

    /// Lift the global pause.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Storage`] when the flag cannot be persisted.
    pub async fn unpause(&self) -> TorrentResult<()> {
        self.set_global_pause(false).await
    }

    async fn set_global_pause(&self, paused: bool) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let mut client = self.get_state();
        if client.paused == paused {
            return Ok(());
        }
        client.paused = paused;
        self.commit_client(if paused { "pause" } else { "unpause" }, client)
            .await?;
        info!(paused, "global pause changed");
        self.reconcile().await;
        Ok(())
    }

    /// Explicitly pause one torrent. Already paused torrents are left as is.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidState`] for finished or errored torrents.
    pub async fn pause_torrent(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let record = self.require(info_hash, "pause_torrent").await?;
        if record.state == TorrentState::Paused {
            return Ok(());
        }
        if !is_schedulable(record.state) {
            return Err(invalid_state("pause_torrent", &record));
        }
        self.apply_transition(&record, TorrentState::Paused, None)
            .await?;
        self.reconcile().await;
        Ok(())
    }

    /// Continue a paused torrent, or retry an errored one.
    ///
    /// A paused torrent whose session is gone is re-attached from its stored
    /// source; a failure there is recorded on the torrent as `Error`.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidState`] for finished torrents.
    pub async fn resume_torrent(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let record = self.require(info_hash, "resume_torrent").await?;
        match record.state {
            TorrentState::Paused => {
                let attached = if self.engine.session(info_hash).is_some() {
                    true
                } else {
                    match self.engine.add_session(record.source.clone()).await {
                        Ok(handle) => {
                            self.record_handle(&record.info_hash, &handle, "resume_torrent")
                                .await?;
                            true
                        }
                        Err(err) => {
                            self.capture_failure(&record, &err).await?;
                            false
                        }
                    }
                };
                if attached {
                    self.apply_transition(&record, TorrentState::Downloading, None)
                        .await?;
                }
                self.reconcile().await;
                Ok(())
            }
            TorrentState::Error => self.retry_locked(record).await,
            TorrentState::Queued | TorrentState::Verifying | TorrentState::Downloading => Ok(()),
            TorrentState::Finished => Err(invalid_state("resume_torrent", &record)),
        }
    }

    /// Re-add the session of an errored torrent from its stored source.
    ///
    /// A repeated engine failure leaves the torrent in `Error` with the new
    /// message and is not returned as an error.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidState`] unless the torrent is in `Error`.
    pub async fn retry_torrent(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let record = self.require(info_hash, "retry_torrent").await?;
        self.retry_locked(record).await
    }

    async fn retry_locked(&self, record: TorrentRecord) -> TorrentResult<()> {
        if record.state != TorrentState::Error {
            return Err(invalid_state("retry_torrent", &record));
        }
        if let Err(err) = self.engine.remove_session(&record.info_hash, false).await {
            let detail = format!("{err:#}");
            warn!(info_hash = %record.info_hash, error = %detail, "failed to drop stale session before retry");
        }
        match self.engine.add_session(record.source.clone()).await {
            Ok(handle) => {
                self.record_handle(&record.info_hash, &handle, "retry_torrent")
                    .await?;
                self.apply_transition(&record, TorrentState::Downloading, None)
                    .await?;
            }
            Err(err) => self.capture_failure(&record, &err).await?,
        }
        self.reconcile().await;
        Ok(())
    }

    /// Store the name, size, and file list an engine handle carries.
    pub(super) async fn record_handle(
        &self,
        info_hash: &InfoHash,
        handle: &SessionHandle,
        operation: &'static str,
    ) -> TorrentResult<()> {
        if handle.name.is_some() || handle.size_bytes.is_some() {
            self.store
                .update_metadata(info_hash, handle.name.as_deref(), handle.size_bytes)
                .await
                .storage(operation)?;
        }
        if !handle.files.is_empty() {
            self.store
                .upsert_files(info_hash, &handle.files)
                .await
                .storage(operation)?;
        }
        debug!(info_hash = %info_hash, operation, files = handle.files.len(), "engine handle recorded");
        Ok(())
    }

    /// Give one torrent exclusive bandwidth.
    ///
    /// Any previous holder loses the designation. Other running sessions are
    /// paused; a user-paused torrent may be marked and stays paused.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidState`] for finished or errored
    /// torrents.
    pub async fn set_critical(&self, info_hash: &InfoHash) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let record = self.require(info_hash, "set_critical").await?;
        if ends_criticality(record.state) {
            return Err(invalid_state("set_critical", &record));
        }
        let mut client = self.get_state();
        if client.is_critical(info_hash) {
            return Ok(());
        }
        let previous = client.critical.replace(info_hash.clone());
        self.commit_client("set_critical", client).await?;

        let current = self.get_state();
        if !current.is_critical(info_hash) {
            return Err(TorrentError::ConflictingCritical {
                holder: current.critical,
                requested: info_hash.clone(),
            });
        }
        info!(
            info_hash = %info_hash,
            previous = ?previous.as_ref().map(InfoHash::as_str),
            "critical torrent set"
        );
        self.reconcile().await;
        Ok(())
    }

    /// Restore shared scheduling.
    ///
    /// With `Some(hash)` the designation is only cleared when that torrent
    /// holds it.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Storage`] when the change cannot be persisted.
    pub async fn clear_critical(&self, info_hash: Option<&InfoHash>) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let mut client = self.get_state();
        let Some(holder) = client.critical.take() else {
            return Ok(());
        };
        if info_hash.is_some_and(|requested| *requested != holder) {
            return Ok(());
        }
        self.commit_client("clear_critical", client).await?;
        info!(info_hash = %holder, "critical torrent cleared");
        self.reconcile().await;
        Ok(())
    }

    /// Cap the aggregate download rate; `None` or zero removes the cap.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Engine`] when the engine rejects the limit;
    /// nothing is persisted in that case.
    pub async fn set_download_speed_limit(&self, limit_bps: Option<u64>) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let mut client = self.get_state();
        client.download_limit_bps = limit_bps.filter(|bps| *bps > 0);
        self.apply_limits_locked("set_download_speed_limit", client)
            .await
    }

    /// Cap the aggregate upload rate; `None` or zero removes the cap.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Engine`] when the engine rejects the limit;
    /// nothing is persisted in that case.
    pub async fn set_upload_speed_limit(&self, limit_bps: Option<u64>) -> TorrentResult<()> {
        let _guard = self.ops.lock().await;
        let mut client = self.get_state();
        client.upload_limit_bps = limit_bps.filter(|bps| *bps > 0);
        self.apply_limits_locked("set_upload_speed_limit", client)
            .await
    }

    async fn apply_limits_locked(
        &self,
        operation: &'static str,
        client: ClientState,
    ) -> TorrentResult<()> {
        let limits = client.limits();
        self.engine
            .apply_limits(limits)
            .await
            .map_err(|err| self.engine_failure(operation, &err))?;
        self.commit_client(operation, client).await?;
        info!(
            download_bps = ?limits.download_bps,
            upload_bps = ?limits.upload_bps,
            "speed limits changed"
        );
        Ok(())
    }

    /// Record an engine failure on the torrent and move it to `Error`.
    pub(super) async fn capture_failure(
        &self,
        record: &TorrentRecord,
        err: &anyhow::Error,
    ) -> TorrentResult<()> {
        self.metrics.inc_engine_error();
        let message = format!("{err:#}");
        error!(info_hash = %record.info_hash, error = %message, "engine session failed");
        if record.state == TorrentState::Error {
            return self
                .store
                .update_state(&record.info_hash, TorrentState::Error, Some(&message))
                .await
                .storage("capture_failure");
        }
        self.apply_transition(record, TorrentState::Error, Some(&message))
            .await
    }

    fn engine_failure(&self, operation: &'static str, err: &anyhow::Error) -> TorrentError {
        self.metrics.inc_engine_error();
        TorrentError::engine(operation, err)
    }

    fn announce_added(&self, record: &TorrentRecord) {
        let _ = self.events.publish(Event::TorrentAdded {
            info_hash: record.info_hash.clone(),
            name: record.name.clone(),
        });
        info!(info_hash = %record.info_hash, state = %record.state, "torrent added");
    }
}

fn invalid_state(operation: &'static str, record: &TorrentRecord) -> TorrentError {
    TorrentError::InvalidState {
        operation,
        info_hash: record.info_hash.clone(),
        state: record.state,
    }
}
