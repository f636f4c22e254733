//! Event payload types carried across the platform.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EventsError, EventsResult};

/// Identifier assigned to each event emitted by the platform.
pub type EventId = u64;

/// Events buffered per subscriber before it starts lagging.
pub const DEFAULT_BUS_CAPACITY: usize = 1_024;

/// Stable content identifier of a torrent.
///
/// Values are normalised to lowercase so the same content submitted through
/// differently-cased magnet links maps onto one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InfoHash(String);

impl InfoHash {
    /// Validate and normalise a raw info hash.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::InvalidInfoHash`] when the value is empty or
    /// contains whitespace.
    pub fn parse(raw: &str) -> EventsResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(EventsError::InvalidInfoHash {
                value: raw.to_string(),
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// Borrow the normalised textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InfoHash {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for InfoHash {
    type Err = EventsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for InfoHash {
    type Error = EventsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InfoHash> for String {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

/// Lifecycle states of a torrent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Submitted; the engine has not reported metadata yet.
    Queued,
    /// The engine is re-checking data already on disk.
    Verifying,
    /// Payload bytes are being fetched.
    Downloading,
    /// Halted by an explicit user pause.
    Paused,
    /// Every byte is present. Terminal for the record.
    Finished,
    /// The engine reported an unrecoverable failure.
    Error,
}

impl TorrentState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Queued,
        Self::Verifying,
        Self::Downloading,
        Self::Paused,
        Self::Finished,
        Self::Error,
    ];

    /// Stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Verifying => "verifying",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

impl Display for TorrentState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for TorrentState {
    type Err = EventsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| EventsError::UnknownTorrentState {
                value: value.to_string(),
            })
    }
}

/// Individual file discovered within a torrent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the torrent root.
    pub path: String,
    /// Size of the file in bytes.
    pub size_bytes: u64,
}

/// Byte-level progress of one file inside a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileProgress {
    /// Path relative to the torrent root.
    pub path: String,
    /// Bytes of this file present on disk.
    pub completed_bytes: u64,
    /// Size of the file in bytes.
    pub size_bytes: u64,
}

/// Typed domain events surfaced across the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A torrent record was created.
    TorrentAdded {
        /// Torrent identifier.
        info_hash: InfoHash,
        /// Display name when already known.
        name: Option<String>,
    },
    /// The engine learned the torrent's name, size and file layout.
    MetadataResolved {
        /// Torrent identifier.
        info_hash: InfoHash,
        /// Display name reported by the engine.
        name: Option<String>,
        /// Total payload size.
        size_bytes: u64,
        /// Files contained in the torrent.
        files: Vec<DiscoveredFile>,
    },
    /// The engine started re-checking existing data.
    VerificationStarted {
        /// Torrent identifier.
        info_hash: InfoHash,
    },
    /// The engine finished re-checking existing data.
    VerificationCompleted {
        /// Torrent identifier.
        info_hash: InfoHash,
        /// Bytes confirmed valid.
        verified_bytes: u64,
        /// Total payload size.
        total_bytes: u64,
    },
    /// The engine started fetching payload bytes.
    DownloadStarted {
        /// Torrent identifier.
        info_hash: InfoHash,
    },
    /// Byte counters moved.
    Progress {
        /// Torrent identifier.
        info_hash: InfoHash,
        /// Bytes present on disk.
        downloaded_bytes: u64,
        /// Total payload size.
        total_bytes: u64,
        /// Per-file counters.
        files: Vec<FileProgress>,
    },
    /// A single file has all of its bytes.
    FileCompleted {
        /// Torrent identifier.
        info_hash: InfoHash,
        /// Path relative to the torrent root.
        path: String,
    },
    /// Every byte of the torrent has been received.
    DownloadCompleted {
        /// Torrent identifier.
        info_hash: InfoHash,
    },
    /// The engine gave up on a session.
    SessionFailed {
        /// Torrent identifier.
        info_hash: InfoHash,
        /// Engine-supplied message, kept verbatim.
        message: String,
    },
    /// The orchestrator applied a lifecycle transition.
    StateChanged {
        /// Torrent identifier.
        info_hash: InfoHash,
        /// Previous state.
        from: TorrentState,
        /// New state.
        to: TorrentState,
    },
    /// A torrent record and its data were removed.
    TorrentRemoved {
        /// Torrent identifier.
        info_hash: InfoHash,
    },
    /// A single file record and its data were removed.
    FileRemoved {
        /// Owning torrent.
        info_hash: InfoHash,
        /// Path relative to the torrent root.
        path: String,
    },
    /// Global pause, criticality or speed limits changed.
    SchedulerChanged {
        /// Global pause flag.
        paused: bool,
        /// Torrent holding exclusive bandwidth, if any.
        critical: Option<InfoHash>,
        /// Download cap in bytes per second; `None` is unlimited.
        download_limit_bps: Option<u64>,
        /// Upload cap in bytes per second; `None` is unlimited.
        upload_limit_bps: Option<u64>,
    },
    /// Engine health changed; lists the degraded components.
    HealthChanged {
        /// Components currently degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TorrentAdded { .. } => "torrent_added",
            Self::MetadataResolved { .. } => "metadata_resolved",
            Self::VerificationStarted { .. } => "verification_started",
            Self::VerificationCompleted { .. } => "verification_completed",
            Self::DownloadStarted { .. } => "download_started",
            Self::Progress { .. } => "progress",
            Self::FileCompleted { .. } => "file_completed",
            Self::DownloadCompleted { .. } => "download_completed",
            Self::SessionFailed { .. } => "session_failed",
            Self::StateChanged { .. } => "state_changed",
            Self::TorrentRemoved { .. } => "torrent_removed",
            Self::FileRemoved { .. } => "file_removed",
            Self::SchedulerChanged { .. } => "scheduler_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Torrent the event refers to, when it concerns a single torrent.
    #[must_use]
    pub const fn info_hash(&self) -> Option<&InfoHash> {
        match self {
            Self::TorrentAdded { info_hash, .. }
            | Self::MetadataResolved { info_hash, .. }
            | Self::VerificationStarted { info_hash }
            | Self::VerificationCompleted { info_hash, .. }
            | Self::DownloadStarted { info_hash }
            | Self::Progress { info_hash, .. }
            | Self::FileCompleted { info_hash, .. }
            | Self::DownloadCompleted { info_hash }
            | Self::SessionFailed { info_hash, .. }
            | Self::StateChanged { info_hash, .. }
            | Self::TorrentRemoved { info_hash }
            | Self::FileRemoved { info_hash, .. } => Some(info_hash),
            Self::SchedulerChanged { .. } | Self::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(raw: &str) -> InfoHash {
        InfoHash::parse(raw).expect("valid info hash")
    }

    #[test]
    fn info_hash_is_normalised_to_lowercase() {
        let parsed = hash("  ABCDEF0123  ");
        assert_eq!(parsed.as_str(), "abcdef0123");
        assert_eq!(parsed, hash("abcdef0123"));
    }

    #[test]
    fn info_hash_rejects_blank_and_embedded_whitespace() {
        assert!(InfoHash::parse("").is_err());
        assert!(InfoHash::parse("   ").is_err());
        assert!(InfoHash::parse("abc 123").is_err());
    }

    #[test]
    fn info_hash_deserialisation_applies_validation() {
        let parsed: InfoHash = serde_json::from_str("\"ABC123\"").expect("deserialize");
        assert_eq!(parsed.as_str(), "abc123");
        assert!(serde_json::from_str::<InfoHash>("\"\"").is_err());
    }

    #[test]
    fn torrent_state_labels_round_trip() {
        for state in TorrentState::ALL {
            assert_eq!(state.as_str().parse::<TorrentState>(), Ok(state));
        }
        assert!("seeding".parse::<TorrentState>().is_err());
    }

    #[test]
    fn event_kind_and_info_hash_cover_torrent_variants() {
        let id = hash("abc123");
        let event = Event::SessionFailed {
            info_hash: id.clone(),
            message: "tracker unreachable".into(),
        };
        assert_eq!(event.kind(), "session_failed");
        assert_eq!(event.info_hash(), Some(&id));

        let scheduler = Event::SchedulerChanged {
            paused: true,
            critical: None,
            download_limit_bps: None,
            upload_limit_bps: Some(1_024),
        };
        assert_eq!(scheduler.kind(), "scheduler_changed");
        assert!(scheduler.info_hash().is_none());
    }

    #[test]
    fn events_serialise_with_type_tag() {
        let event = Event::FileCompleted {
            info_hash: hash("abc123"),
            path: "disc/track01.flac".into(),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], "file_completed");
        assert_eq!(value["info_hash"], "abc123");
    }
}
