//! Last polled session snapshots, shared between the worker and readers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hearth_events::InfoHash;
use hearth_torrent_core::{SessionSnapshot, TransferSpeeds};

#[derive(Debug, Default)]
struct CacheState {
    sessions: HashMap<InfoHash, SessionSnapshot>,
    speeds: TransferSpeeds,
}

/// Snapshot cache written by the worker after every poll.
///
/// Readers take a short read lock and never wait on engine I/O.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCache {
    inner: Arc<RwLock<CacheState>>,
}

impl SnapshotCache {
    /// Snapshot of one session.
    #[must_use]
    pub fn get(&self, info_hash: &InfoHash) -> Option<SessionSnapshot> {
        self.read().sessions.get(info_hash).cloned()
    }

    /// Aggregate transfer rates from the last poll.
    #[must_use]
    pub fn speeds(&self) -> TransferSpeeds {
        self.read().speeds
    }

    /// Number of sessions seen in the last poll.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    /// Whether the last poll saw no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the cache with a fresh poll result.
    pub(crate) fn replace(&self, snapshots: Vec<SessionSnapshot>) {
        let speeds = snapshots
            .iter()
            .fold(TransferSpeeds::default(), |acc, snapshot| TransferSpeeds {
                download_bps: acc.download_bps.saturating_add(snapshot.download_bps),
                upload_bps: acc.upload_bps.saturating_add(snapshot.upload_bps),
            });
        let sessions = snapshots
            .into_iter()
            .map(|snapshot| (snapshot.info_hash.clone(), snapshot))
            .collect();
        let mut state = self.write();
        state.sessions = sessions;
        state.speeds = speeds;
    }

    /// Drop one session ahead of the next poll.
    pub(crate) fn remove(&self, info_hash: &InfoHash) {
        let mut state = self.write();
        if let Some(removed) = state.sessions.remove(info_hash) {
            state.speeds.download_bps = state.speeds.download_bps.saturating_sub(removed.download_bps);
            state.speeds.upload_bps = state.speeds.upload_bps.saturating_sub(removed.upload_bps);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
