//! Criticality and global-pause scheduling.

use tracing::{debug, warn};

use hearth_events::{InfoHash, TorrentState};
use hearth_torrent_core::lifecycle::is_schedulable;
use hearth_torrent_core::{ClientState, TorrentEngine, TorrentRepository};

use super::TorrentOrchestrator;

/// States whose attached sessions the scheduler pauses and resumes.
/// `Finished` sessions are seeding and yield like any other.
const SCHEDULED_STATES: [TorrentState; 5] = [
    TorrentState::Queued,
    TorrentState::Verifying,
    TorrentState::Downloading,
    TorrentState::Paused,
    TorrentState::Finished,
];

/// Whether a torrent's session should be consuming bandwidth.
///
/// The critical torrent runs even under the global pause; with no critical
/// torrent every schedulable one runs unless the client is paused. Seeding
/// sessions of finished torrents run only when nothing is critical and the
/// client is not paused.
pub(super) fn should_run(state: TorrentState, info_hash: &InfoHash, client: &ClientState) -> bool {
    if state == TorrentState::Finished {
        return client.critical.is_none() && !client.paused;
    }
    if !is_schedulable(state) {
        return false;
    }
    match &client.critical {
        Some(holder) => holder == info_hash,
        None => !client.paused,
    }
}

impl<E, R> TorrentOrchestrator<E, R>
where
    E: TorrentEngine + 'static,
    R: TorrentRepository + 'static,
{
    /// Pause or resume attached sessions so they match [`should_run`].
    ///
    /// Only sessions that exist are touched and each one's cached pause flag
    /// decides whether a call is needed, so user-paused torrents stay paused.
    /// Engine failures are logged; the next reconcile retries them.
    pub(super) async fn reconcile(&self) {
        let client = self.get_state();
        let records = match self.store.list_torrents(&SCHEDULED_STATES).await {
            Ok(records) => records,
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(error = %detail, "scheduler could not list torrents");
                return;
            }
        };

        let mut managed = 0_usize;
        let mut running = 0_usize;
        for record in &records {
            if record.state != TorrentState::Finished {
                managed += 1;
            }
            let Some(snapshot) = self.engine.session(&record.info_hash) else {
                continue;
            };
            let run = should_run(record.state, &record.info_hash, &client);
            let outcome = match (run, snapshot.is_paused()) {
                (true, true) => Some(self.engine.resume_session(&record.info_hash).await),
                (false, false) => Some(self.engine.pause_session(&record.info_hash).await),
                _ => None,
            };
            match outcome {
                Some(Ok(())) => {
                    debug!(info_hash = %record.info_hash, run, "session schedule applied");
                }
                Some(Err(err)) => {
                    self.metrics.inc_engine_error();
                    let detail = format!("{err:#}");
                    warn!(info_hash = %record.info_hash, run, error = %detail, "failed to apply session schedule");
                }
                None => {}
            }
            if run {
                running += 1;
            }
        }

        self.metrics.set_managed_torrents(managed);
        self.metrics.set_active_sessions(running);
        let _ = self.speeds();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_events::TorrentState::{Downloading, Error, Finished, Paused, Queued, Verifying};

    fn hash(raw: &str) -> InfoHash {
        InfoHash::parse(raw).expect("hash")
    }

    #[test]
    fn without_critical_everything_schedulable_runs() {
        let client = ClientState::default();
        for state in [Queued, Verifying, Downloading, Finished] {
            assert!(should_run(state, &hash("t1"), &client), "{state}");
        }
        for state in [Paused, Error] {
            assert!(!should_run(state, &hash("t1"), &client), "{state}");
        }
    }

    #[test]
    fn critical_torrent_runs_alone() {
        let client = ClientState {
            critical: Some(hash("t1")),
            ..ClientState::default()
        };
        assert!(should_run(Downloading, &hash("t1"), &client));
        assert!(!should_run(Downloading, &hash("t2"), &client));
    }

    #[test]
    fn global_pause_spares_only_the_critical_torrent() {
        let mut client = ClientState {
            paused: true,
            ..ClientState::default()
        };
        assert!(!should_run(Downloading, &hash("t1"), &client));

        client.critical = Some(hash("t1"));
        assert!(should_run(Downloading, &hash("t1"), &client));
        assert!(!should_run(Queued, &hash("t2"), &client));
    }

    #[test]
    fn user_pause_wins_over_criticality() {
        let client = ClientState {
            critical: Some(hash("t1")),
            ..ClientState::default()
        };
        assert!(!should_run(Paused, &hash("t1"), &client));
    }

    #[test]
    fn seeding_yields_to_pause_and_criticality() {
        let mut client = ClientState {
            paused: true,
            ..ClientState::default()
        };
        assert!(!should_run(Finished, &hash("t1"), &client));

        client.paused = false;
        client.critical = Some(hash("t2"));
        assert!(!should_run(Finished, &hash("t1"), &client));
    }
}
