//! Torrent lifecycle transition table and scheduling predicates.

use hearth_events::TorrentState;

/// Whether a torrent may move from `from` to `to`.
///
/// Same-state moves are not transitions and return `false`.
#[must_use]
pub const fn can_transition(from: TorrentState, to: TorrentState) -> bool {
    use hearth_events::TorrentState::{Downloading, Error, Finished, Paused, Queued, Verifying};

    matches!(
        (from, to),
        (Queued, Verifying | Downloading | Paused | Finished | Error)
            | (Verifying, Downloading | Finished | Paused | Error)
            | (Downloading, Finished | Paused | Error | Verifying)
            | (Paused, Downloading | Finished | Error)
            | (Error, Downloading)
    )
}

/// Whether an engine report may move a torrent from `from` to `to`.
///
/// Leaving `Paused` for `Downloading` and leaving `Error` are user actions
/// (resume, retry); a late engine event must not undo them.
#[must_use]
pub const fn engine_can_transition(from: TorrentState, to: TorrentState) -> bool {
    can_transition(from, to)
        && !matches!(
            (from, to),
            (TorrentState::Paused, TorrentState::Downloading) | (TorrentState::Error, _)
        )
}

/// States whose sessions the scheduler may run.
#[must_use]
pub const fn is_schedulable(state: TorrentState) -> bool {
    matches!(
        state,
        TorrentState::Queued | TorrentState::Verifying | TorrentState::Downloading
    )
}

/// States that keep an engine session attached across restarts.
#[must_use]
pub const fn keeps_session(state: TorrentState) -> bool {
    is_schedulable(state) || matches!(state, TorrentState::Paused)
}

/// Terminal outcomes that end a critical designation.
#[must_use]
pub const fn ends_criticality(state: TorrentState) -> bool {
    matches!(state, TorrentState::Finished | TorrentState::Error)
}

/// Display rank used when listing torrents; lower sorts first.
#[must_use]
pub const fn display_rank(state: TorrentState) -> u8 {
    match state {
        TorrentState::Downloading => 0,
        TorrentState::Verifying => 1,
        TorrentState::Queued => 2,
        TorrentState::Paused => 3,
        TorrentState::Error => 4,
        TorrentState::Finished => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_events::TorrentState::{Downloading, Error, Finished, Paused, Queued, Verifying};

    #[test]
    fn documented_transitions_are_allowed() {
        for (from, to) in [
            (Queued, Verifying),
            (Queued, Downloading),
            (Verifying, Downloading),
            (Verifying, Finished),
            (Downloading, Finished),
            (Downloading, Paused),
            (Downloading, Error),
            (Paused, Downloading),
            (Error, Downloading),
        ] {
            assert!(can_transition(from, to), "{from} -> {to}");
        }
    }

    #[test]
    fn finished_is_terminal() {
        for to in TorrentState::ALL {
            assert!(!can_transition(Finished, to), "finished -> {to}");
        }
    }

    #[test]
    fn error_only_recovers_through_retry() {
        for to in TorrentState::ALL {
            assert_eq!(can_transition(Error, to), to == Downloading, "error -> {to}");
        }
    }

    #[test]
    fn same_state_is_not_a_transition() {
        for state in TorrentState::ALL {
            assert!(!can_transition(state, state));
        }
    }

    #[test]
    fn engine_reports_cannot_resume_or_retry() {
        assert!(!engine_can_transition(Paused, Downloading));
        assert!(!engine_can_transition(Error, Downloading));
        assert!(engine_can_transition(Paused, Finished));
        assert!(engine_can_transition(Paused, Error));
        assert!(engine_can_transition(Queued, Downloading));
        assert!(engine_can_transition(Downloading, Verifying));
    }

    #[test]
    fn paused_torrents_keep_sessions_but_are_not_scheduled() {
        assert!(keeps_session(Paused));
        assert!(!is_schedulable(Paused));
        assert!(!keeps_session(Finished));
        assert!(!keeps_session(Error));
    }

    #[test]
    fn display_rank_puts_active_work_first() {
        let mut states = TorrentState::ALL.to_vec();
        states.sort_by_key(|state| display_rank(*state));
        assert_eq!(states, vec![Downloading, Verifying, Queued, Paused, Error, Finished]);
    }
}
