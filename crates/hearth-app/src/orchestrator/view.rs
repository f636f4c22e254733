//! Read models returned to callers: torrent overviews, pages, and status.

use serde::Serialize;

use hearth_torrent_core::lifecycle::display_rank;
use hearth_torrent_core::{ClientState, TorrentRecord, TransferSpeeds};

/// Number of torrents per listing page.
pub const LIST_PAGE_SIZE: usize = 5;

/// A torrent record with its reconciled progress.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TorrentOverview {
    /// Durable record.
    pub record: TorrentRecord,
    /// `max(durable, live)` progress; `1.0` once finished.
    pub real_progress: f64,
    /// Share of previously recorded progress re-confirmed, while verifying.
    pub verified_fraction: Option<f64>,
    /// Whether the torrent holds exclusive bandwidth.
    pub critical: bool,
}

/// One page of the torrent listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TorrentPage {
    /// Zero-based page index.
    pub page: usize,
    /// Torrents on this page.
    pub items: Vec<TorrentOverview>,
    /// Whether a further page exists.
    pub has_more: bool,
}

/// Snapshot of the whole client.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClientStatus {
    /// Scheduler state.
    pub state: ClientState,
    /// Aggregate transfer rates.
    pub speeds: TransferSpeeds,
    /// Sum of all known torrent sizes.
    pub total_size_bytes: u64,
    /// Torrents still queued, verifying, or downloading.
    pub active: Vec<TorrentOverview>,
}

/// Order newest-first records by display rank (stable), then cut one page.
pub(crate) fn paginate(mut records: Vec<TorrentRecord>, page: usize) -> (Vec<TorrentRecord>, bool) {
    records.sort_by_key(|record| display_rank(record.state));
    let start = page.saturating_mul(LIST_PAGE_SIZE);
    let has_more = records.len() > start.saturating_add(LIST_PAGE_SIZE);
    let items = records
        .into_iter()
        .skip(start)
        .take(LIST_PAGE_SIZE)
        .collect();
    (items, has_more)
}
