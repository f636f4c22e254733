//! Records, engine DTOs, and scheduler state shared across crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hearth_events::{DiscoveredFile, FileProgress, InfoHash, TorrentState};

use crate::progress::fraction;

const MAGNET_PREFIX: &str = "magnet:?";
const BTIH_PREFIX: &str = "urn:btih:";

/// Source payload used to admit a torrent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TorrentSource {
    /// Magnet URI.
    Magnet {
        /// Magnet URI string.
        uri: String,
    },
    /// Raw `.torrent` metainfo bytes.
    Metainfo {
        /// Bencoded metainfo payload.
        bytes: Vec<u8>,
    },
}

impl TorrentSource {
    /// Convenience constructor for magnet sources.
    #[must_use]
    pub fn magnet(uri: impl Into<String>) -> Self {
        Self::Magnet { uri: uri.into() }
    }

    /// Convenience constructor for metainfo sources.
    #[must_use]
    pub fn metainfo(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Metainfo {
            bytes: bytes.into(),
        }
    }

    /// Storage label for the source kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Magnet { .. } => "magnet",
            Self::Metainfo { .. } => "metainfo",
        }
    }

    /// Info hash carried by a magnet's `xt=urn:btih:` parameter.
    ///
    /// Metainfo payloads return `None`; their hash is only known once the
    /// engine has parsed them.
    #[must_use]
    pub fn info_hash_hint(&self) -> Option<InfoHash> {
        let Self::Magnet { uri } = self else {
            return None;
        };
        let trimmed = uri.trim();
        let query = trimmed
            .get(..MAGNET_PREFIX.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(MAGNET_PREFIX))
            .map(|_| &trimmed[MAGNET_PREFIX.len()..])?;

        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if !key.eq_ignore_ascii_case("xt") {
                return None;
            }
            let hash = value
                .get(..BTIH_PREFIX.len())
                .filter(|prefix| prefix.eq_ignore_ascii_case(BTIH_PREFIX))
                .map(|_| &value[BTIH_PREFIX.len()..])?;
            InfoHash::parse(hash).ok()
        })
    }
}

/// Handle returned when the engine admits or attaches to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionHandle {
    /// Content identifier reported by the engine.
    pub info_hash: InfoHash,
    /// Display name, once metadata is known.
    pub name: Option<String>,
    /// Total payload size, once metadata is known.
    pub size_bytes: Option<u64>,
    /// File layout, empty until metadata is known.
    pub files: Vec<DiscoveredFile>,
}

/// Coarse session status as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for metadata from peers.
    Resolving,
    /// Re-checking pieces already on disk.
    Checking,
    /// Fetching payload bytes.
    Downloading,
    /// Detached from bandwidth consumption.
    Paused,
    /// Every byte present.
    Seeding,
    /// The engine gave up on the session.
    Failed {
        /// Engine-supplied failure detail.
        message: String,
    },
}

/// Last polled view of a live engine session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Content identifier.
    pub info_hash: InfoHash,
    /// Display name, once metadata is known.
    pub name: Option<String>,
    /// Total payload size, once metadata is known.
    pub total_bytes: Option<u64>,
    /// Bytes present on disk.
    pub downloaded_bytes: u64,
    /// Coarse status.
    pub status: SessionStatus,
    /// Per-file byte counters, empty until metadata is known.
    pub files: Vec<FileProgress>,
    /// Current download rate in bytes per second.
    pub download_bps: u64,
    /// Current upload rate in bytes per second.
    pub upload_bps: u64,
}

impl SessionSnapshot {
    /// Download fraction, when the total size is known and non-zero.
    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        self.total_bytes
            .and_then(|total| fraction(self.downloaded_bytes, total))
    }

    /// Download fraction of one file.
    #[must_use]
    pub fn file_progress(&self, path: &str) -> Option<f64> {
        self.files
            .iter()
            .find(|file| file.path == path)
            .and_then(|file| fraction(file.completed_bytes, file.size_bytes))
    }

    /// Whether the engine currently holds the session detached.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        matches!(self.status, SessionStatus::Paused)
    }
}

/// Aggregate transfer rates across every session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferSpeeds {
    /// Download rate in bytes per second.
    pub download_bps: u64,
    /// Upload rate in bytes per second.
    pub upload_bps: u64,
}

/// Global transfer caps; `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeedLimits {
    /// Download cap in bytes per second.
    pub download_bps: Option<u64>,
    /// Upload cap in bytes per second.
    pub upload_bps: Option<u64>,
}

/// Durable torrent record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TorrentRecord {
    /// Content identifier and primary key.
    pub info_hash: InfoHash,
    /// Display name, optional until metadata is known.
    pub name: Option<String>,
    /// Total size, optional until metadata is known.
    pub size_bytes: Option<u64>,
    /// Last durable progress checkpoint in `[0, 1]`.
    pub progress: f64,
    /// Lifecycle state.
    pub state: TorrentState,
    /// Engine failure detail; set only in [`TorrentState::Error`].
    pub error_message: Option<String>,
    /// Payload used to (re-)attach the engine session.
    pub source: TorrentSource,
    /// Creation timestamp, used for default ordering.
    pub created_at: DateTime<Utc>,
}

/// Input for creating a torrent record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTorrent {
    /// Content identifier.
    pub info_hash: InfoHash,
    /// Display name when already known.
    pub name: Option<String>,
    /// Total size when already known.
    pub size_bytes: Option<u64>,
    /// Initial lifecycle state.
    pub state: TorrentState,
    /// Engine failure detail for records created directly in `Error`.
    pub error_message: Option<String>,
    /// Payload used to admit the torrent.
    pub source: TorrentSource,
}

/// Lifecycle state of an individual file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Bytes are still arriving.
    Downloading,
    /// Every byte of the file is present.
    Finished,
}

impl FileState {
    /// Stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Finished => "finished",
        }
    }

    /// Parse a storage label.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "downloading" => Some(Self::Downloading),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Durable per-file record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TorrentFileRecord {
    /// Surrogate key.
    pub id: i64,
    /// Owning torrent.
    pub info_hash: InfoHash,
    /// Path relative to the torrent root, unique within the torrent.
    pub path: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Lifecycle state.
    pub state: FileState,
    /// Last durable progress checkpoint in `[0, 1]`.
    pub progress: f64,
}

/// Process-wide scheduler state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientState {
    /// Global pause flag affecting every non-critical session.
    pub paused: bool,
    /// Torrent holding exclusive bandwidth, if any.
    pub critical: Option<InfoHash>,
    /// Download cap in bytes per second; `None` is unlimited.
    pub download_limit_bps: Option<u64>,
    /// Upload cap in bytes per second; `None` is unlimited.
    pub upload_limit_bps: Option<u64>,
}

impl ClientState {
    /// Speed caps as handed to the engine.
    #[must_use]
    pub const fn limits(&self) -> SpeedLimits {
        SpeedLimits {
            download_bps: self.download_limit_bps,
            upload_bps: self.upload_limit_bps,
        }
    }

    /// Whether the given torrent holds the critical designation.
    #[must_use]
    pub fn is_critical(&self, info_hash: &InfoHash) -> bool {
        self.critical.as_ref() == Some(info_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU: &str = "magnet:?xt=urn:btih:DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C&dn=ubuntu";

    #[test]
    fn magnet_hint_extracts_lowercased_btih() {
        let hint = TorrentSource::magnet(UBUNTU).info_hash_hint();
        assert_eq!(
            hint.map(String::from).as_deref(),
            Some("dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c")
        );
    }

    #[test]
    fn magnet_hint_skips_other_parameters_and_case() {
        let uri = "MAGNET:?dn=x&tr=udp%3A%2F%2Ftracker&XT=URN:BTIH:abc123";
        let hint = TorrentSource::magnet(uri).info_hash_hint();
        assert_eq!(hint.map(String::from).as_deref(), Some("abc123"));
    }

    #[test]
    fn malformed_sources_have_no_hint() {
        assert!(TorrentSource::magnet("https://example.com").info_hash_hint().is_none());
        assert!(TorrentSource::magnet("magnet:?dn=only-a-name").info_hash_hint().is_none());
        assert!(TorrentSource::metainfo(b"d4:infod".to_vec()).info_hash_hint().is_none());
    }

    #[test]
    fn snapshot_progress_requires_known_total() {
        let mut snapshot = SessionSnapshot {
            info_hash: InfoHash::parse("abc123").expect("hash"),
            name: None,
            total_bytes: None,
            downloaded_bytes: 40,
            status: SessionStatus::Downloading,
            files: vec![FileProgress {
                path: "a.bin".into(),
                completed_bytes: 10,
                size_bytes: 40,
            }],
            download_bps: 0,
            upload_bps: 0,
        };
        assert!(snapshot.progress().is_none());

        snapshot.total_bytes = Some(100);
        assert_eq!(snapshot.progress(), Some(0.4));
        assert_eq!(snapshot.file_progress("a.bin"), Some(0.25));
        assert!(snapshot.file_progress("missing.bin").is_none());
        assert!(!snapshot.is_paused());
    }

    #[test]
    fn client_state_reports_critical_holder() {
        let hash = InfoHash::parse("t1").expect("hash");
        let state = ClientState {
            critical: Some(hash.clone()),
            download_limit_bps: Some(1_000),
            ..ClientState::default()
        };
        assert!(state.is_critical(&hash));
        assert_eq!(state.limits().download_bps, Some(1_000));
        assert_eq!(state.limits().upload_bps, None);
    }
}
