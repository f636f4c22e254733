#![allow(clippy::redundant_pub_crate)]

use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hearth_events::{DiscoveredFile, Event, EventBus, InfoHash};
use hearth_torrent_core::{SessionHandle, SessionSnapshot, SessionStatus, TorrentSource};

use crate::cache::SnapshotCache;
use crate::command::EngineCommand;
use crate::error::EngineError;
use crate::session::EngineSession;

const HEALTH_COMPONENT: &str = "session";

pub(crate) fn spawn(
    events: EventBus,
    mut commands: mpsc::Receiver<EngineCommand>,
    session: Box<dyn EngineSession>,
    cache: SnapshotCache,
    download_root: PathBuf,
    poll_interval: Duration,
    add_timeout: Duration,
) {
    tokio::spawn(async move {
        let mut worker = Worker::new(events, session, cache, download_root, add_timeout);
        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => worker.handle(command).await,
                        None => break,
                    }
                }
                _ = poll.tick() => worker.refresh().await,
            }
        }
        worker.refresh().await;
        debug!("engine worker stopped");
    });
}

pub(crate) struct Worker {
    events: EventBus,
    session: Box<dyn EngineSession>,
    cache: SnapshotCache,
    download_root: PathBuf,
    add_timeout: Duration,
    previous: HashMap<InfoHash, SessionSnapshot>,
    health: BTreeSet<String>,
}

impl Worker {
    pub(crate) fn new(
        events: EventBus,
        session: Box<dyn EngineSession>,
        cache: SnapshotCache,
        download_root: PathBuf,
        add_timeout: Duration,
    ) -> Self {
        Self {
            events,
            session,
            cache,
            download_root,
            add_timeout,
            previous: HashMap::new(),
            health: BTreeSet::new(),
        }
    }

    /// Run one command and reply to its caller once the snapshot cache
    /// reflects the change.
    pub(crate) async fn handle(&mut self, command: EngineCommand) {
        let operation = command.operation();
        let outcome = match command {
            EngineCommand::Add { source, respond_to } => {
                let result = self.add(&source).await;
                if let Ok(handle) = &result {
                    info!(info_hash = %handle.info_hash, "engine session attached");
                }
                self.settle(operation, respond_to, result).await
            }
            EngineCommand::Pause {
                info_hash,
                respond_to,
            } => {
                let result = self.session.pause(&info_hash).await;
                self.settle(operation, respond_to, result).await
            }
            EngineCommand::Resume {
                info_hash,
                respond_to,
            } => {
                let result = self.session.resume(&info_hash).await;
                self.settle(operation, respond_to, result).await
            }
            EngineCommand::Remove {
                info_hash,
                delete_files,
                respond_to,
            } => {
                let result = self.remove(&info_hash, delete_files).await;
                self.settle(operation, respond_to, result).await
            }
            EngineCommand::RemoveFile {
                info_hash,
                path,
                respond_to,
            } => {
                let result = self.remove_file(&info_hash, &path).await;
                self.settle(operation, respond_to, result).await
            }
            EngineCommand::ApplyLimits { limits, respond_to } => {
                let result = self.session.apply_limits(&limits).await;
                if result.is_ok() {
                    info!(
                        download_bps = ?limits.download_bps,
                        upload_bps = ?limits.upload_bps,
                        "engine speed limits applied"
                    );
                }
                self.settle(operation, respond_to, result).await
            }
        };

        match outcome {
            Ok(()) => self.mark_recovered(HEALTH_COMPONENT),
            Err(detail) => {
                warn!(operation, error = %detail, "engine command failed");
                self.mark_degraded(HEALTH_COMPONENT, &detail);
            }
        }
    }

    async fn settle<T>(
        &mut self,
        operation: &'static str,
        respond_to: tokio::sync::oneshot::Sender<Result<T>>,
        result: Result<T>,
    ) -> std::result::Result<(), String> {
        let outcome = result.as_ref().map(|_| ()).map_err(|err| format!("{err:#}"));
        self.refresh().await;
        if respond_to.send(result).is_err() {
            debug!(operation, "engine command caller went away");
        }
        outcome
    }

    /// Attach a session, giving up once `add_timeout` elapses. Magnet adds
    /// resolve metadata before returning, and every other command waits
    /// behind them.
    async fn add(&mut self, source: &TorrentSource) -> Result<SessionHandle> {
        let timeout = self.add_timeout;
        tokio::time::timeout(timeout, self.session.add(source))
            .await
            .unwrap_or_else(|_| {
                warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "engine gave up attaching session"
                );
                Err(EngineError::AddTimedOut { timeout }.into())
            })
    }

    async fn remove(&mut self, info_hash: &InfoHash, delete_files: bool) -> Result<()> {
        let existed = self.session.remove(info_hash, delete_files).await?;
        self.previous.remove(info_hash);
        self.cache.remove(info_hash);
        if delete_files {
            let directory = self.download_root.join(info_hash.as_str());
            match tokio::fs::remove_dir_all(&directory).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(EngineError::Io {
                        operation: "purge_torrent_data",
                        path: directory,
                        source,
                    }
                    .into());
                }
            }
        }
        info!(info_hash = %info_hash, existed, delete_files, "engine session removed");
        Ok(())
    }

    async fn remove_file(&mut self, info_hash: &InfoHash, path: &str) -> Result<()> {
        let target = self
            .download_root
            .join(info_hash.as_str())
            .join(safe_relative_path(path)?);
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(EngineError::Io {
                    operation: "remove_file",
                    path: target,
                    source,
                }
                .into());
            }
        }
        info!(info_hash = %info_hash, path, "torrent file removed from disk");
        Ok(())
    }

    /// Poll the session, publish derived events, and refresh the cache.
    pub(crate) async fn refresh(&mut self) {
        match self.session.poll().await {
            Ok(snapshots) => {
                for snapshot in &snapshots {
                    for event in derive_events(self.previous.get(&snapshot.info_hash), snapshot) {
                        let _ = self.events.publish(event);
                    }
                }
                self.previous = snapshots
                    .iter()
                    .map(|snapshot| (snapshot.info_hash.clone(), snapshot.clone()))
                    .collect();
                self.cache.replace(snapshots);
            }
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(error = %detail, "engine polling failed");
                self.mark_degraded(HEALTH_COMPONENT, &detail);
            }
        }
    }

    fn mark_degraded(&mut self, component: &str, detail: &str) {
        if self.health.insert(component.to_string()) {
            let degraded = self.health.iter().cloned().collect::<Vec<_>>();
            let _ = self.events.publish(Event::HealthChanged { degraded });
            warn!(component, detail = %detail, "engine component degraded");
        }
    }

    fn mark_recovered(&mut self, component: &str) {
        if self.health.remove(component) {
            let degraded = self.health.iter().cloned().collect::<Vec<_>>();
            let _ = self.events.publish(Event::HealthChanged { degraded });
            info!(component, "engine component recovered");
        }
    }
}

/// Reject paths that would leave the torrent's directory.
pub(crate) fn safe_relative_path(path: &str) -> Result<PathBuf, EngineError> {
    let candidate = Path::new(path);
    let normal = candidate
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if path.is_empty() || !normal {
        return Err(EngineError::UnsafePath {
            path: path.to_string(),
        });
    }
    Ok(candidate.to_path_buf())
}

/// Events implied by moving from `previous` to `next`.
///
/// Emission order is metadata, progress, file completions, then status, so a
/// completion event always follows the final byte counters.
pub(crate) fn derive_events(
    previous: Option<&SessionSnapshot>,
    next: &SessionSnapshot,
) -> Vec<Event> {
    let info_hash = &next.info_hash;
    let mut events = Vec::new();

    let had_metadata = previous.is_some_and(|prev| prev.total_bytes.is_some());
    if let (false, Some(total)) = (had_metadata, next.total_bytes) {
        events.push(Event::MetadataResolved {
            info_hash: info_hash.clone(),
            name: next.name.clone(),
            size_bytes: total,
            files: next
                .files
                .iter()
                .map(|file| DiscoveredFile {
                    path: file.path.clone(),
                    size_bytes: file.size_bytes,
                })
                .collect(),
        });
    }

    if let Some(total) = next.total_bytes {
        let moved = previous.is_none_or(|prev| prev.downloaded_bytes != next.downloaded_bytes);
        if moved {
            events.push(Event::Progress {
                info_hash: info_hash.clone(),
                downloaded_bytes: next.downloaded_bytes,
                total_bytes: total,
                files: next.files.clone(),
            });
        }
    }

    for file in &next.files {
        if file.completed_bytes < file.size_bytes {
            continue;
        }
        let was_complete = previous
            .and_then(|prev| prev.files.iter().find(|old| old.path == file.path))
            .is_some_and(|old| old.completed_bytes >= old.size_bytes);
        if !was_complete {
            events.push(Event::FileCompleted {
                info_hash: info_hash.clone(),
                path: file.path.clone(),
            });
        }
    }

    let previous_status = previous.map(|prev| &prev.status);
    if previous_status != Some(&next.status) {
        let was_checking = matches!(previous_status, Some(SessionStatus::Checking));
        let verification_completed = Event::VerificationCompleted {
            info_hash: info_hash.clone(),
            verified_bytes: next.downloaded_bytes,
            total_bytes: next.total_bytes.unwrap_or_default(),
        };
        match &next.status {
            SessionStatus::Checking => events.push(Event::VerificationStarted {
                info_hash: info_hash.clone(),
            }),
            SessionStatus::Downloading => {
                if was_checking {
                    events.push(verification_completed);
                }
                events.push(Event::DownloadStarted {
                    info_hash: info_hash.clone(),
                });
            }
            SessionStatus::Seeding => {
                if was_checking {
                    events.push(verification_completed);
                } else {
                    events.push(Event::DownloadCompleted {
                        info_hash: info_hash.clone(),
                    });
                }
            }
            SessionStatus::Failed { message } => events.push(Event::SessionFailed {
                info_hash: info_hash.clone(),
                message: message.clone(),
            }),
            SessionStatus::Resolving | SessionStatus::Paused => {}
        }
    }

    events
}
