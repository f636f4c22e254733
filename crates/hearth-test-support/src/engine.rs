//! In-memory [`TorrentEngine`] that records every call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use hearth_events::{DiscoveredFile, FileProgress, InfoHash};
use hearth_torrent_core::{
    SessionHandle, SessionSnapshot, SessionStatus, SpeedLimits, TorrentEngine, TorrentSource,
    TransferSpeeds,
};

/// One call observed by the fake engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `add_session` for the resolved hash.
    Add(InfoHash),
    /// `pause_session`.
    Pause(InfoHash),
    /// `resume_session`.
    Resume(InfoHash),
    /// `remove_session`.
    Remove {
        /// Target session.
        info_hash: InfoHash,
        /// Whether on-disk data was deleted.
        delete_files: bool,
    },
    /// `remove_file`.
    RemoveFile {
        /// Owning session.
        info_hash: InfoHash,
        /// Relative file path.
        path: String,
    },
    /// `apply_limits`.
    ApplyLimits(SpeedLimits),
}

#[derive(Debug, Clone)]
struct FakeSession {
    snapshot: SessionSnapshot,
    paused: bool,
    live_progress: Option<f64>,
}

#[derive(Debug, Default)]
struct FakeState {
    sessions: BTreeMap<InfoHash, FakeSession>,
    metainfo: HashMap<Vec<u8>, SessionHandle>,
    calls: Vec<EngineCall>,
    fail_next_add: Option<String>,
    limits: SpeedLimits,
    speeds: TransferSpeeds,
}

/// Fake engine for orchestrator tests.
///
/// Sessions start running. Magnets resolve their hash from the `xt`
/// parameter; metainfo payloads must be registered with
/// [`FakeEngine::register_metainfo`] first.
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    /// Create an engine with no sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `add_session` fail with `message`.
    pub fn fail_next_add(&self, message: impl Into<String>) {
        self.lock().fail_next_add = Some(message.into());
    }

    /// Describe the session a metainfo payload resolves to.
    pub fn register_metainfo(&self, bytes: impl Into<Vec<u8>>, handle: SessionHandle) {
        self.lock().metainfo.insert(bytes.into(), handle);
    }

    /// Override the live progress fraction reported for a session.
    pub fn set_live_progress(&self, info_hash: &InfoHash, progress: Option<f64>) {
        if let Some(session) = self.lock().sessions.get_mut(info_hash) {
            session.live_progress = progress;
        }
    }

    /// Set byte counters for one file of a session.
    pub fn set_file_progress(&self, info_hash: &InfoHash, path: &str, completed: u64, size: u64) {
        let mut state = self.lock();
        let Some(session) = state.sessions.get_mut(info_hash) else {
            return;
        };
        let files = &mut session.snapshot.files;
        match files.iter_mut().find(|file| file.path == path) {
            Some(file) => {
                file.completed_bytes = completed;
                file.size_bytes = size;
            }
            None => files.push(FileProgress {
                path: path.to_string(),
                completed_bytes: completed,
                size_bytes: size,
            }),
        }
    }

    /// Set the coarse status a session reports.
    pub fn set_status(&self, info_hash: &InfoHash, status: SessionStatus) {
        if let Some(session) = self.lock().sessions.get_mut(info_hash) {
            session.snapshot.status = status;
        }
    }

    /// Set the aggregate transfer rates.
    pub fn set_speeds(&self, speeds: TransferSpeeds) {
        self.lock().speeds = speeds;
    }

    /// Forget a session without recording a call, as after a process restart.
    pub fn drop_session(&self, info_hash: &InfoHash) {
        self.lock().sessions.remove(info_hash);
    }

    /// Whether a session exists.
    #[must_use]
    pub fn has_session(&self, info_hash: &InfoHash) -> bool {
        self.lock().sessions.contains_key(info_hash)
    }

    /// Pause flag of a session, `None` when absent.
    #[must_use]
    pub fn is_paused(&self, info_hash: &InfoHash) -> Option<bool> {
        self.lock()
            .sessions
            .get(info_hash)
            .map(|session| session.paused)
    }

    /// Every call observed so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Limits most recently applied.
    #[must_use]
    pub fn limits(&self) -> SpeedLimits {
        self.lock().limits
    }

    fn resolve(state: &FakeState, source: &TorrentSource) -> Result<SessionHandle> {
        match source {
            TorrentSource::Magnet { .. } => {
                let info_hash = source
                    .info_hash_hint()
                    .ok_or_else(|| anyhow!("magnet link has no btih hash"))?;
                Ok(SessionHandle {
                    info_hash,
                    name: None,
                    size_bytes: None,
                    files: Vec::new(),
                })
            }
            TorrentSource::Metainfo { bytes } => state
                .metainfo
                .get(bytes)
                .cloned()
                .ok_or_else(|| anyhow!("unrecognised metainfo payload")),
        }
    }
}

fn snapshot_for(handle: &SessionHandle) -> SessionSnapshot {
    let status = if handle.size_bytes.is_some() {
        SessionStatus::Downloading
    } else {
        SessionStatus::Resolving
    };
    SessionSnapshot {
        info_hash: handle.info_hash.clone(),
        name: handle.name.clone(),
        total_bytes: handle.size_bytes,
        downloaded_bytes: 0,
        status,
        files: handle.files.iter().map(file_progress).collect(),
        download_bps: 0,
        upload_bps: 0,
    }
}

fn file_progress(file: &DiscoveredFile) -> FileProgress {
    FileProgress {
        path: file.path.clone(),
        completed_bytes: 0,
        size_bytes: file.size_bytes,
    }
}

#[async_trait]
impl TorrentEngine for FakeEngine {
    async fn add_session(&self, source: TorrentSource) -> Result<SessionHandle> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_add.take() {
            bail!(message);
        }
        let handle = Self::resolve(&state, &source)?;
        state.calls.push(EngineCall::Add(handle.info_hash.clone()));
        state
            .sessions
            .entry(handle.info_hash.clone())
            .or_insert_with(|| FakeSession {
                snapshot: snapshot_for(&handle),
                paused: false,
                live_progress: None,
            });
        Ok(handle)
    }

    fn session(&self, info_hash: &InfoHash) -> Option<SessionSnapshot> {
        self.lock().sessions.get(info_hash).map(|session| {
            let mut snapshot = session.snapshot.clone();
            if session.paused {
                snapshot.status = SessionStatus::Paused;
            }
            snapshot
        })
    }

    async fn pause_session(&self, info_hash: &InfoHash) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Pause(info_hash.clone()));
        let session = state
            .sessions
            .get_mut(info_hash)
            .ok_or_else(|| anyhow!("no session for {info_hash}"))?;
        session.paused = true;
        Ok(())
    }

    async fn resume_session(&self, info_hash: &InfoHash) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Resume(info_hash.clone()));
        let session = state
            .sessions
            .get_mut(info_hash)
            .ok_or_else(|| anyhow!("no session for {info_hash}"))?;
        session.paused = false;
        Ok(())
    }

    async fn remove_session(&self, info_hash: &InfoHash, delete_files: bool) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Remove {
            info_hash: info_hash.clone(),
            delete_files,
        });
        state.sessions.remove(info_hash);
        Ok(())
    }

    async fn remove_file(&self, info_hash: &InfoHash, path: &str) -> Result<()> {
        self.lock().calls.push(EngineCall::RemoveFile {
            info_hash: info_hash.clone(),
            path: path.to_string(),
        });
        Ok(())
    }

    async fn apply_limits(&self, limits: SpeedLimits) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::ApplyLimits(limits));
        state.limits = limits;
        Ok(())
    }

    fn session_progress(&self, info_hash: &InfoHash) -> Option<f64> {
        let state = self.lock();
        let session = state.sessions.get(info_hash)?;
        session.live_progress.or_else(|| session.snapshot.progress())
    }

    fn session_speeds(&self) -> TransferSpeeds {
        self.lock().speeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{discovered, info_hash, magnet};

    #[tokio::test]
    async fn magnet_adds_are_idempotent_and_recorded() -> Result<()> {
        let engine = FakeEngine::new();
        let first = engine.add_session(magnet("abc123")).await?;
        let second = engine.add_session(magnet("abc123")).await?;
        assert_eq!(first, second);
        assert_eq!(
            engine.count_calls(|call| matches!(call, EngineCall::Add(_))),
            2
        );
        assert_eq!(engine.is_paused(&info_hash("abc123")), Some(false));
        Ok(())
    }

    #[tokio::test]
    async fn failure_is_consumed_once() -> Result<()> {
        let engine = FakeEngine::new();
        engine.fail_next_add("tracker unreachable");
        let err = engine
            .add_session(magnet("abc123"))
            .await
            .expect_err("first add fails");
        assert_eq!(err.to_string(), "tracker unreachable");
        engine.add_session(magnet("abc123")).await?;
        assert!(engine.has_session(&info_hash("abc123")));
        Ok(())
    }

    #[tokio::test]
    async fn registered_metainfo_resolves_with_metadata() -> Result<()> {
        let engine = FakeEngine::new();
        let handle = SessionHandle {
            info_hash: info_hash("feed01"),
            name: Some("iso".into()),
            size_bytes: Some(10),
            files: vec![discovered("iso.img", 10)],
        };
        engine.register_metainfo(b"d4:info".to_vec(), handle.clone());
        let resolved = engine
            .add_session(TorrentSource::metainfo(b"d4:info".to_vec()))
            .await?;
        assert_eq!(resolved, handle);
        let snapshot = engine.session(&handle.info_hash).expect("session");
        assert_eq!(snapshot.status, SessionStatus::Downloading);

        assert!(
            engine
                .add_session(TorrentSource::metainfo(b"garbage".to_vec()))
                .await
                .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn pause_is_reflected_in_snapshot() -> Result<()> {
        let engine = FakeEngine::new();
        let hash = info_hash("abc123");
        engine.add_session(magnet("abc123")).await?;
        engine.pause_session(&hash).await?;
        assert!(engine.session(&hash).is_some_and(|s| s.is_paused()));
        engine.resume_session(&hash).await?;
        assert!(engine.session(&hash).is_some_and(|s| !s.is_paused()));
        assert!(engine.pause_session(&info_hash("missing")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn live_progress_override_wins() -> Result<()> {
        let engine = FakeEngine::new();
        let hash = info_hash("abc123");
        engine.add_session(magnet("abc123")).await?;
        assert_eq!(engine.session_progress(&hash), None);
        engine.set_live_progress(&hash, Some(0.4));
        assert_eq!(engine.session_progress(&hash), Some(0.4));
        Ok(())
    }
}
