//! librqbit-backed session.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session,
    SessionOptions, TorrentStatsState,
};
use tracing::debug;

/// Mirrors `librqbit::torrent_state::ManagedTorrentHandle`, which is not re-exported.
type ManagedTorrentHandle = Arc<ManagedTorrent>;

use hearth_events::{DiscoveredFile, FileProgress, InfoHash};
use hearth_torrent_core::{
    SessionHandle, SessionSnapshot, SessionStatus, SpeedLimits, TorrentSource,
};

use super::EngineSession;

/// librqbit reports rates in MiB/s.
const MIB_PER_SEC_TO_BYTES: f64 = 1024.0 * 1024.0;

struct Tracked {
    handle: ManagedTorrentHandle,
    name: Option<String>,
    files: Vec<DiscoveredFile>,
}

impl Tracked {
    fn session_handle(&self, info_hash: &InfoHash) -> SessionHandle {
        let size = self.files.iter().map(|file| file.size_bytes).sum::<u64>();
        SessionHandle {
            info_hash: info_hash.clone(),
            name: self.name.clone(),
            size_bytes: (!self.files.is_empty()).then_some(size),
            files: self.files.clone(),
        }
    }
}

pub(super) struct RqbitSession {
    session: Arc<Session>,
    download_root: PathBuf,
    torrents: HashMap<InfoHash, Tracked>,
}

pub(super) async fn create_session(download_root: &Path) -> Result<Box<dyn EngineSession>> {
    let session = Session::new_with_opts(download_root.to_path_buf(), SessionOptions::default())
        .await
        .context("failed to create librqbit session")?;
    Ok(Box::new(RqbitSession {
        session,
        download_root: download_root.to_path_buf(),
        torrents: HashMap::new(),
    }))
}

fn to_add_torrent(source: &TorrentSource) -> AddTorrent<'_> {
    match source {
        TorrentSource::Magnet { uri } => AddTorrent::from_url(uri.as_str()),
        TorrentSource::Metainfo { bytes } => AddTorrent::from_bytes(bytes.clone()),
    }
}

fn metadata_files(handle: &ManagedTorrentHandle) -> Vec<DiscoveredFile> {
    handle
        .with_metadata(|metadata| {
            metadata
                .file_infos
                .iter()
                .map(|info| DiscoveredFile {
                    path: info.relative_filename.to_string_lossy().into_owned(),
                    size_bytes: info.len,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn to_bytes_per_sec(mbps: f64) -> u64 {
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "rates are non-negative and far below u64::MAX"
    )]
    {
        (mbps.max(0.0) * MIB_PER_SEC_TO_BYTES) as u64
    }
}

fn to_rate_limit(bps: Option<u64>) -> Option<NonZeroU32> {
    bps.and_then(|value| NonZeroU32::new(u32::try_from(value).unwrap_or(u32::MAX)))
}

impl RqbitSession {
    /// Resolve the info hash of a source without starting a download.
    async fn resolve_info_hash(&self, source: &TorrentSource) -> Result<InfoHash> {
        let response = self
            .session
            .add_torrent(
                to_add_torrent(source),
                Some(AddTorrentOptions {
                    list_only: true,
                    ..Default::default()
                }),
            )
            .await
            .context("failed to read torrent metadata")?;
        let raw = match response {
            AddTorrentResponse::ListOnly(listing) => listing.info_hash.as_string(),
            AddTorrentResponse::Added(_, handle) | AddTorrentResponse::AlreadyManaged(_, handle) => {
                handle.info_hash().as_string()
            }
        };
        Ok(InfoHash::parse(&raw)?)
    }

    fn tracked(&self, info_hash: &InfoHash) -> Result<&Tracked> {
        self.torrents
            .get(info_hash)
            .ok_or_else(|| {
                crate::error::EngineError::UnknownSession {
                    info_hash: info_hash.clone(),
                }
                .into()
            })
    }
}

#[async_trait]
impl EngineSession for RqbitSession {
    async fn add(&mut self, source: &TorrentSource) -> Result<SessionHandle> {
        let info_hash = match source.info_hash_hint() {
            Some(hint) => hint,
            None => self.resolve_info_hash(source).await?,
        };
        if let Some(tracked) = self.torrents.get(&info_hash) {
            return Ok(tracked.session_handle(&info_hash));
        }

        let output_folder = self.download_root.join(info_hash.as_str());
        let response = self
            .session
            .add_torrent(
                to_add_torrent(source),
                Some(AddTorrentOptions {
                    output_folder: Some(output_folder.to_string_lossy().into_owned()),
                    overwrite: true,
                    ..Default::default()
                }),
            )
            .await
            .context("librqbit rejected torrent")?;
        let handle = response
            .into_handle()
            .context("librqbit returned no torrent handle")?;
        let reported = InfoHash::parse(&handle.info_hash().as_string())?;
        let tracked = Tracked {
            name: handle.name(),
            files: metadata_files(&handle),
            handle,
        };
        let session_handle = tracked.session_handle(&reported);
        debug!(info_hash = %reported, output = %output_folder.display(), "librqbit torrent added");
        self.torrents.insert(reported, tracked);
        Ok(session_handle)
    }

    async fn pause(&mut self, info_hash: &InfoHash) -> Result<()> {
        let tracked = self.tracked(info_hash)?;
        self.session
            .pause(&tracked.handle)
            .await
            .context("librqbit pause failed")
    }

    async fn resume(&mut self, info_hash: &InfoHash) -> Result<()> {
        let tracked = self.tracked(info_hash)?;
        self.session
            .unpause(&tracked.handle)
            .await
            .context("librqbit resume failed")
    }

    async fn remove(&mut self, info_hash: &InfoHash, delete_files: bool) -> Result<bool> {
        let Some(tracked) = self.torrents.remove(info_hash) else {
            return Ok(false);
        };
        self.session
            .delete(tracked.handle.id().into(), delete_files)
            .await
            .context("librqbit delete failed")?;
        Ok(true)
    }

    async fn apply_limits(&mut self, limits: &SpeedLimits) -> Result<()> {
        self.session
            .ratelimits
            .set_download_bps(to_rate_limit(limits.download_bps));
        self.session
            .ratelimits
            .set_upload_bps(to_rate_limit(limits.upload_bps));
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<SessionSnapshot>> {
        let mut snapshots = Vec::with_capacity(self.torrents.len());
        for (info_hash, tracked) in &mut self.torrents {
            if tracked.files.is_empty() {
                tracked.files = metadata_files(&tracked.handle);
                tracked.name = tracked.handle.name();
            }
            let stats = tracked.handle.stats();
            let status = match stats.state {
                TorrentStatsState::Initializing => SessionStatus::Checking,
                TorrentStatsState::Paused => SessionStatus::Paused,
                TorrentStatsState::Error => SessionStatus::Failed {
                    message: stats
                        .error
                        .clone()
                        .unwrap_or_else(|| "engine reported an unspecified error".to_string()),
                },
                TorrentStatsState::Live if stats.finished => SessionStatus::Seeding,
                TorrentStatsState::Live => SessionStatus::Downloading,
            };
            let (download_bps, upload_bps) = stats.live.as_ref().map_or((0, 0), |live| {
                (
                    to_bytes_per_sec(live.download_speed.mbps),
                    to_bytes_per_sec(live.upload_speed.mbps),
                )
            });
            let files = tracked
                .files
                .iter()
                .enumerate()
                .map(|(index, file)| FileProgress {
                    path: file.path.clone(),
                    completed_bytes: stats.file_progress.get(index).copied().unwrap_or(0),
                    size_bytes: file.size_bytes,
                })
                .collect();
            snapshots.push(SessionSnapshot {
                info_hash: info_hash.clone(),
                name: tracked.name.clone(),
                total_bytes: (!tracked.files.is_empty()).then_some(stats.total_bytes),
                downloaded_bytes: stats.progress_bytes,
                status,
                files,
                download_bps,
                upload_bps,
            });
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_rates_are_mebibytes_per_second() {
        assert_eq!(to_bytes_per_sec(1.0), 1_048_576);
        assert_eq!(to_bytes_per_sec(0.5), 524_288);
        assert_eq!(to_bytes_per_sec(-3.0), 0);
    }

    #[test]
    fn zero_limit_means_unlimited() {
        assert_eq!(to_rate_limit(None), None);
        assert_eq!(to_rate_limit(Some(0)), None);
        assert_eq!(to_rate_limit(Some(u64::MAX)), NonZeroU32::new(u32::MAX));
    }
}
