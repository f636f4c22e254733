use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use async_trait::async_trait;

use hearth_events::{DiscoveredFile, FileProgress, InfoHash};
use hearth_torrent_core::{
    SessionHandle, SessionSnapshot, SessionStatus, SpeedLimits, TorrentSource,
};

use super::EngineSession;
use crate::error::EngineError;

/// In-memory session used by default builds and tests.
///
/// Clones share state, so a test can keep one handle while the worker owns
/// another and drive sessions through the `resolve_metadata`, `set_status`,
/// and `set_file_progress` hooks.
#[derive(Clone, Default)]
pub struct StubSession {
    inner: Arc<Mutex<StubState>>,
}

#[derive(Default)]
struct StubState {
    torrents: BTreeMap<InfoHash, StubTorrent>,
    limits: SpeedLimits,
    fail_next_add: Option<String>,
}

struct StubTorrent {
    snapshot: SessionSnapshot,
    resume_status: SessionStatus,
}

impl StubTorrent {
    fn handle(&self) -> SessionHandle {
        let snapshot = &self.snapshot;
        SessionHandle {
            info_hash: snapshot.info_hash.clone(),
            name: snapshot.name.clone(),
            size_bytes: snapshot.total_bytes,
            files: snapshot
                .files
                .iter()
                .map(|file| DiscoveredFile {
                    path: file.path.clone(),
                    size_bytes: file.size_bytes,
                })
                .collect(),
        }
    }
}

impl StubSession {
    /// Make the next `add` fail with the given engine message.
    pub fn fail_next_add(&self, message: impl Into<String>) {
        self.lock().fail_next_add = Some(message.into());
    }

    /// Report metadata for a session and start downloading it.
    pub fn resolve_metadata(&self, info_hash: &InfoHash, name: &str, files: &[DiscoveredFile]) {
        self.update(info_hash, |torrent| {
            let snapshot = &mut torrent.snapshot;
            snapshot.name = Some(name.to_string());
            snapshot.total_bytes = Some(files.iter().map(|file| file.size_bytes).sum());
            snapshot.files = files
                .iter()
                .map(|file| FileProgress {
                    path: file.path.clone(),
                    completed_bytes: 0,
                    size_bytes: file.size_bytes,
                })
                .collect();
            snapshot.status = SessionStatus::Downloading;
        });
    }

    /// Force a session status.
    pub fn set_status(&self, info_hash: &InfoHash, status: SessionStatus) {
        self.update(info_hash, |torrent| torrent.snapshot.status = status);
    }

    /// Set the bytes present for one file and recompute the torrent total.
    pub fn set_file_progress(&self, info_hash: &InfoHash, path: &str, completed_bytes: u64) {
        self.update(info_hash, |torrent| {
            let snapshot = &mut torrent.snapshot;
            if let Some(file) = snapshot.files.iter_mut().find(|file| file.path == path) {
                file.completed_bytes = completed_bytes.min(file.size_bytes);
            }
            snapshot.downloaded_bytes = snapshot.files.iter().map(|file| file.completed_bytes).sum();
        });
    }

    /// Set the live transfer rates of a session.
    pub fn set_rates(&self, info_hash: &InfoHash, download_bps: u64, upload_bps: u64) {
        self.update(info_hash, |torrent| {
            torrent.snapshot.download_bps = download_bps;
            torrent.snapshot.upload_bps = upload_bps;
        });
    }

    /// Whether a session exists for the torrent.
    #[must_use]
    pub fn contains(&self, info_hash: &InfoHash) -> bool {
        self.lock().torrents.contains_key(info_hash)
    }

    /// Limits most recently applied.
    #[must_use]
    pub fn limits(&self) -> SpeedLimits {
        self.lock().limits
    }

    fn update(&self, info_hash: &InfoHash, apply: impl FnOnce(&mut StubTorrent)) {
        if let Some(torrent) = self.lock().torrents.get_mut(info_hash) {
            apply(torrent);
        }
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stub_info_hash(source: &TorrentSource) -> Result<InfoHash> {
    match source {
        TorrentSource::Magnet { .. } => source.info_hash_hint().ok_or_else(|| {
            EngineError::InvalidSource {
                reason: "magnet link has no btih info hash",
            }
            .into()
        }),
        TorrentSource::Metainfo { bytes } => {
            if bytes.is_empty() {
                bail!(EngineError::InvalidSource {
                    reason: "metainfo payload is empty",
                });
            }
            let mut hasher = DefaultHasher::new();
            bytes.hash(&mut hasher);
            Ok(InfoHash::parse(&format!("{:016x}", hasher.finish()))?)
        }
    }
}

#[async_trait]
impl EngineSession for StubSession {
    async fn add(&mut self, source: &TorrentSource) -> Result<SessionHandle> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_add.take() {
            bail!(message);
        }
        let info_hash = stub_info_hash(source)?;
        let torrent = state
            .torrents
            .entry(info_hash.clone())
            .or_insert_with(|| StubTorrent {
                snapshot: SessionSnapshot {
                    info_hash,
                    name: None,
                    total_bytes: None,
                    downloaded_bytes: 0,
                    status: SessionStatus::Resolving,
                    files: Vec::new(),
                    download_bps: 0,
                    upload_bps: 0,
                },
                resume_status: SessionStatus::Downloading,
            });
        Ok(torrent.handle())
    }

    async fn pause(&mut self, info_hash: &InfoHash) -> Result<()> {
        let mut state = self.lock();
        let torrent = state
            .torrents
            .get_mut(info_hash)
            .ok_or_else(|| EngineError::UnknownSession {
                info_hash: info_hash.clone(),
            })?;
        if !torrent.snapshot.is_paused() {
            torrent.resume_status =
                std::mem::replace(&mut torrent.snapshot.status, SessionStatus::Paused);
            torrent.snapshot.download_bps = 0;
            torrent.snapshot.upload_bps = 0;
        }
        Ok(())
    }

    async fn resume(&mut self, info_hash: &InfoHash) -> Result<()> {
        let mut state = self.lock();
        let torrent = state
            .torrents
            .get_mut(info_hash)
            .ok_or_else(|| EngineError::UnknownSession {
                info_hash: info_hash.clone(),
            })?;
        if torrent.snapshot.is_paused() {
            torrent.snapshot.status =
                std::mem::replace(&mut torrent.resume_status, SessionStatus::Downloading);
        }
        Ok(())
    }

    async fn remove(&mut self, info_hash: &InfoHash, _delete_files: bool) -> Result<bool> {
        Ok(self.lock().torrents.remove(info_hash).is_some())
    }

    async fn apply_limits(&mut self, limits: &SpeedLimits) -> Result<()> {
        self.lock().limits = *limits;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<SessionSnapshot>> {
        Ok(self
            .lock()
            .torrents
            .values()
            .map(|torrent| torrent.snapshot.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGNET: &str = "magnet:?xt=urn:btih:abc123&dn=demo";

    fn hash() -> InfoHash {
        InfoHash::parse("abc123").expect("hash")
    }

    #[tokio::test]
    async fn add_is_idempotent_for_known_content() -> Result<()> {
        let mut session = StubSession::default();
        let first = session.add(&TorrentSource::magnet(MAGNET)).await?;
        let second = session.add(&TorrentSource::magnet(MAGNET)).await?;

        assert_eq!(first, second);
        assert_eq!(session.poll().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn magnet_without_hash_is_rejected() {
        let mut session = StubSession::default();
        let err = session
            .add(&TorrentSource::magnet("magnet:?dn=nameless"))
            .await
            .expect_err("magnet without btih must fail");
        assert!(err.to_string().contains("no btih info hash"));
    }

    #[tokio::test]
    async fn metainfo_sources_get_stable_identifiers() -> Result<()> {
        let mut session = StubSession::default();
        let bytes = b"d4:infod4:name4:demoee".to_vec();
        let first = session.add(&TorrentSource::metainfo(bytes.clone())).await?;
        let second = session.add(&TorrentSource::metainfo(bytes)).await?;
        assert_eq!(first.info_hash, second.info_hash);
        Ok(())
    }

    #[tokio::test]
    async fn pause_and_resume_restore_prior_status() -> Result<()> {
        let mut session = StubSession::default();
        let _ = session.add(&TorrentSource::magnet(MAGNET)).await?;
        session.set_status(&hash(), SessionStatus::Checking);

        session.pause(&hash()).await?;
        assert!(session.poll().await?[0].is_paused());

        session.resume(&hash()).await?;
        assert_eq!(session.poll().await?[0].status, SessionStatus::Checking);
        Ok(())
    }

    #[tokio::test]
    async fn fail_next_add_is_consumed_once() -> Result<()> {
        let mut session = StubSession::default();
        session.fail_next_add("tracker unreachable");

        let err = session
            .add(&TorrentSource::magnet(MAGNET))
            .await
            .expect_err("scripted failure");
        assert_eq!(err.to_string(), "tracker unreachable");
        assert!(session.add(&TorrentSource::magnet(MAGNET)).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn file_progress_updates_totals() -> Result<()> {
        let mut session = StubSession::default();
        let _ = session.add(&TorrentSource::magnet(MAGNET)).await?;
        session.resolve_metadata(
            &hash(),
            "demo",
            &[
                DiscoveredFile {
                    path: "a.bin".into(),
                    size_bytes: 60,
                },
                DiscoveredFile {
                    path: "b.bin".into(),
                    size_bytes: 40,
                },
            ],
        );
        session.set_file_progress(&hash(), "a.bin", 30);
        session.set_file_progress(&hash(), "b.bin", 500);

        let snapshot = session.poll().await?.remove(0);
        assert_eq!(snapshot.total_bytes, Some(100));
        assert_eq!(snapshot.downloaded_bytes, 70);
        assert_eq!(snapshot.file_progress("b.bin"), Some(1.0));
        Ok(())
    }
}
