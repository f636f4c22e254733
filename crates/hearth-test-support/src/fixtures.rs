//! Identifiers, sources, and event helpers for tests.

use std::time::Duration;

use anyhow::{Result, anyhow};
use hearth_events::{DiscoveredFile, Event, EventStream, InfoHash};
use hearth_torrent_core::TorrentSource;
use tokio_stream::StreamExt;

/// How long [`next_event`] waits before giving up.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Parse an info hash, panicking on malformed input.
///
/// # Panics
///
/// Panics if `raw` is not a valid info hash.
#[must_use]
pub fn info_hash(raw: &str) -> InfoHash {
    InfoHash::parse(raw).unwrap_or_else(|err| panic!("invalid info hash {raw:?}: {err}"))
}

/// Magnet source whose `xt` parameter carries `hash`.
#[must_use]
pub fn magnet(hash: &str) -> TorrentSource {
    TorrentSource::magnet(format!("magnet:?xt=urn:btih:{hash}&dn={hash}"))
}

/// File layout entry.
#[must_use]
pub fn discovered(path: &str, size_bytes: u64) -> DiscoveredFile {
    DiscoveredFile {
        path: path.to_string(),
        size_bytes,
    }
}

/// Wait for the next event matching `predicate`, skipping others.
///
/// # Errors
///
/// Returns an error if the stream closes, lags, or times out.
pub async fn next_event<F>(stream: &mut EventStream, mut predicate: F) -> Result<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while let Some(item) = stream.next().await {
            let envelope = item.map_err(|err| anyhow!("event stream lagged: {err}"))?;
            if predicate(&envelope.event) {
                return Ok(envelope.event);
            }
        }
        Err(anyhow!("event stream closed"))
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for event"))?
}
