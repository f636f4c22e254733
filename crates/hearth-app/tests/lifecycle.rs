mod common;

use anyhow::{Context, Result};
use common::{Harness, approx, handle};
use hearth_events::{Event, TorrentState};
use hearth_test_support::EngineCall;
use hearth_test_support::fixtures::{discovered, info_hash, magnet, next_event};
use hearth_torrent_core::{
    FileState, SessionStatus, TorrentError, TorrentRepository, TorrentSource,
};

#[tokio::test]
async fn real_progress_never_regresses_across_restart() -> Result<()> {
    let harness = Harness::new().await?;
    let hash = info_hash("abc123");
    let added = harness.orchestrator.add_torrent(magnet("abc123")).await?;
    assert_eq!(added.record.state, TorrentState::Queued);

    harness
        .emit(Event::MetadataResolved {
            info_hash: hash.clone(),
            name: Some("archive".into()),
            size_bytes: 1_000,
            files: vec![discovered("a.bin", 600), discovered("b.bin", 400)],
        })
        .await?;
    harness
        .emit(Event::DownloadStarted {
            info_hash: hash.clone(),
        })
        .await?;
    assert_eq!(harness.state("abc123").await?, TorrentState::Downloading);

    harness
        .emit(Event::Progress {
            info_hash: hash.clone(),
            downloaded_bytes: 300,
            total_bytes: 1_000,
            files: Vec::new(),
        })
        .await?;
    assert!(approx(harness.record("abc123").await?.progress, 0.3));

    harness.engine.set_live_progress(&hash, Some(0.4));
    let live = harness.orchestrator.torrent(&hash).await?;
    assert!(approx(live.real_progress, 0.4));
    assert_eq!(live.record.name.as_deref(), Some("archive"));

    // Within the checkpoint interval progress reports are not written back.
    harness
        .emit(Event::Progress {
            info_hash: hash.clone(),
            downloaded_bytes: 400,
            total_bytes: 1_000,
            files: Vec::new(),
        })
        .await?;
    assert!(approx(harness.record("abc123").await?.progress, 0.3));

    // File completion forces a checkpoint of the live value.
    harness
        .emit(Event::FileCompleted {
            info_hash: hash.clone(),
            path: "b.bin".into(),
        })
        .await?;
    assert!(approx(harness.record("abc123").await?.progress, 0.4));

    harness.engine.drop_session(&hash);
    let restarted = harness.restart()?;
    let after_restart = restarted.orchestrator.torrent(&hash).await?;
    assert!(approx(after_restart.real_progress, 0.4));

    let consumer = restarted.orchestrator.start().await?;
    assert!(harness.engine.has_session(&hash));
    harness.engine.set_live_progress(&hash, Some(0.35));
    let reattached = restarted.orchestrator.torrent(&hash).await?;
    assert!(approx(reattached.real_progress, 0.4));
    consumer.abort();
    Ok(())
}

#[tokio::test]
async fn verification_tracks_its_own_fraction() -> Result<()> {
    let harness = Harness::new().await?;
    let hash = harness.downloading("abc123").await?;
    harness
        .emit(Event::Progress {
            info_hash: hash.clone(),
            downloaded_bytes: 400,
            total_bytes: 1_000,
            files: Vec::new(),
        })
        .await?;

    harness
        .emit(Event::VerificationStarted {
            info_hash: hash.clone(),
        })
        .await?;
    harness.engine.set_live_progress(&hash, Some(0.2));
    let verifying = harness.orchestrator.torrent(&hash).await?;
    assert_eq!(verifying.record.state, TorrentState::Verifying);
    assert!(verifying.verified_fraction.is_some_and(|value| approx(value, 0.5)));
    assert!(approx(verifying.real_progress, 0.4));

    harness
        .emit(Event::VerificationCompleted {
            info_hash: hash.clone(),
            verified_bytes: 400,
            total_bytes: 1_000,
        })
        .await?;
    let resumed = harness.orchestrator.torrent(&hash).await?;
    assert_eq!(resumed.record.state, TorrentState::Downloading);
    assert!(resumed.verified_fraction.is_none());
    Ok(())
}

#[tokio::test]
async fn verification_without_recorded_progress_is_skipped() -> Result<()> {
    let harness = Harness::new().await?;
    let hash = harness.downloading("abc123").await?;
    harness
        .emit(Event::VerificationStarted {
            info_hash: hash.clone(),
        })
        .await?;
    assert_eq!(harness.state("abc123").await?, TorrentState::Downloading);
    Ok(())
}

#[tokio::test]
async fn complete_verification_finishes_the_torrent() -> Result<()> {
    let harness = Harness::new().await?;
    harness
        .engine
        .register_metainfo(b"iso".to_vec(), handle("feed01", &[("disk.iso", 800)]));
    harness
        .orchestrator
        .add_torrent(TorrentSource::metainfo(b"iso".to_vec()))
        .await?;
    let hash = info_hash("feed01");
    harness
        .emit(Event::VerificationCompleted {
            info_hash: hash.clone(),
            verified_bytes: 800,
            total_bytes: 800,
        })
        .await?;

    let finished = harness.orchestrator.torrent(&hash).await?;
    assert_eq!(finished.record.state, TorrentState::Finished);
    assert!(approx(finished.record.progress, 1.0));
    let files = harness.orchestrator.torrent_files(&hash).await?;
    assert!(files.iter().all(|file| file.state == FileState::Finished));
    Ok(())
}

#[tokio::test]
async fn download_completion_checkpoints_everything() -> Result<()> {
    let harness = Harness::new().await?;
    harness.engine.register_metainfo(
        b"pack".to_vec(),
        handle("feed02", &[("a.bin", 10), ("b.bin", 30)]),
    );
    harness
        .orchestrator
        .add_torrent(TorrentSource::metainfo(b"pack".to_vec()))
        .await?;
    let hash = info_hash("feed02");
    let mut stream = harness.events.subscribe();

    harness
        .emit(Event::DownloadStarted {
            info_hash: hash.clone(),
        })
        .await?;
    harness
        .emit(Event::DownloadCompleted {
            info_hash: hash.clone(),
        })
        .await?;

    let event = next_event(&mut stream, |event| {
        matches!(
            event,
            Event::StateChanged {
                to: TorrentState::Finished,
                ..
            }
        )
    })
    .await?;
    assert_eq!(
        event,
        Event::StateChanged {
            info_hash: hash.clone(),
            from: TorrentState::Downloading,
            to: TorrentState::Finished,
        }
    );
    let record = harness.record("feed02").await?;
    assert!(approx(record.progress, 1.0));
    for file in harness.orchestrator.torrent_files(&hash).await? {
        assert_eq!(file.state, FileState::Finished);
        assert!(approx(harness.orchestrator.get_file_real_progress(&file), 1.0));
    }
    assert!(harness.metrics.snapshot().checkpoints_total >= 1);
    Ok(())
}

#[tokio::test]
async fn file_progress_is_reconciled_per_file() -> Result<()> {
    let harness = Harness::new().await?;
    harness.engine.register_metainfo(
        b"pack".to_vec(),
        handle("feed03", &[("a.bin", 100), ("b.bin", 100)]),
    );
    harness
        .orchestrator
        .add_torrent(TorrentSource::metainfo(b"pack".to_vec()))
        .await?;
    let hash = info_hash("feed03");
    harness
        .emit(Event::Progress {
            info_hash: hash.clone(),
            downloaded_bytes: 60,
            total_bytes: 200,
            files: vec![hearth_events::FileProgress {
                path: "a.bin".into(),
                completed_bytes: 50,
                size_bytes: 100,
            }],
        })
        .await?;

    let files = harness.orchestrator.torrent_files(&hash).await?;
    let first = files.iter().find(|file| file.path == "a.bin").context("a.bin")?;
    assert!(approx(first.progress, 0.5));

    harness.engine.set_file_progress(&hash, "a.bin", 20, 100);
    assert!(approx(harness.orchestrator.get_file_real_progress(first), 0.5));
    harness.engine.set_file_progress(&hash, "a.bin", 90, 100);
    assert!(approx(harness.orchestrator.get_file_real_progress(first), 0.9));
    Ok(())
}

#[tokio::test]
async fn engine_failure_is_captured_verbatim() -> Result<()> {
    let harness = Harness::new().await?;
    let hash = harness.downloading("abc123").await?;
    harness
        .emit(Event::SessionFailed {
            info_hash: hash.clone(),
            message: "disk full: /downloads".into(),
        })
        .await?;

    let record = harness.record("abc123").await?;
    assert_eq!(record.state, TorrentState::Error);
    assert_eq!(record.error_message.as_deref(), Some("disk full: /downloads"));
    assert_eq!(harness.metrics.snapshot().engine_errors_total, 1);

    // Late reports from the engine do not revive an errored torrent.
    harness
        .emit(Event::DownloadStarted {
            info_hash: hash.clone(),
        })
        .await?;
    assert_eq!(harness.state("abc123").await?, TorrentState::Error);
    Ok(())
}

#[tokio::test]
async fn rejected_magnet_is_recorded_and_retried() -> Result<()> {
    let harness = Harness::new().await?;
    let hash = info_hash("dead01");
    harness.engine.fail_next_add("tracker unreachable");
    let added = harness.orchestrator.add_torrent(magnet("dead01")).await?;
    assert_eq!(added.record.state, TorrentState::Error);
    assert_eq!(
        added.record.error_message.as_deref(),
        Some("tracker unreachable")
    );
    assert!(!harness.engine.has_session(&hash));

    harness.engine.fail_next_add("still unreachable");
    harness.orchestrator.retry_torrent(&hash).await?;
    let record = harness.record("dead01").await?;
    assert_eq!(record.state, TorrentState::Error);
    assert_eq!(record.error_message.as_deref(), Some("still unreachable"));

    harness.orchestrator.resume_torrent(&hash).await?;
    let record = harness.record("dead01").await?;
    assert_eq!(record.state, TorrentState::Downloading);
    assert!(record.error_message.is_none());
    assert!(harness.engine.has_session(&hash));
    assert_eq!(harness.metrics.snapshot().engine_errors_total, 2);
    Ok(())
}

#[tokio::test]
async fn retry_requires_an_errored_torrent() -> Result<()> {
    let harness = Harness::new().await?;
    let hash = harness.downloading("abc123").await?;
    let err = harness
        .orchestrator
        .retry_torrent(&hash)
        .await
        .expect_err("downloading torrents cannot be retried");
    assert!(matches!(
        err,
        TorrentError::InvalidState {
            state: TorrentState::Downloading,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn unparseable_payload_surfaces_engine_error() -> Result<()> {
    let harness = Harness::new().await?;
    let err = harness
        .orchestrator
        .add_torrent(TorrentSource::metainfo(b"garbage".to_vec()))
        .await
        .expect_err("unknown metainfo must fail");
    assert!(
        err.engine_message()
            .is_some_and(|message| message.contains("unrecognised metainfo"))
    );
    assert!(harness.orchestrator.list_torrents(0).await?.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn readding_known_content_returns_existing_record() -> Result<()> {
    let harness = Harness::new().await?;
    let first = harness.orchestrator.add_torrent(magnet("abc123")).await?;
    let second = harness.orchestrator.add_torrent(magnet("ABC123")).await?;
    assert_eq!(first.record, second.record);
    assert_eq!(
        harness
            .engine
            .count_calls(|call| matches!(call, EngineCall::Add(_))),
        1
    );

    harness
        .engine
        .register_metainfo(b"iso".to_vec(), handle("feed01", &[("disk.iso", 8)]));
    let metainfo = TorrentSource::metainfo(b"iso".to_vec());
    let first = harness.orchestrator.add_torrent(metainfo.clone()).await?;
    let second = harness.orchestrator.add_torrent(metainfo).await?;
    assert_eq!(first.record, second.record);
    assert_eq!(harness.orchestrator.list_torrents(0).await?.items.len(), 2);
    Ok(())
}

#[tokio::test]
async fn delete_torrent_removes_records_data_and_session() -> Result<()> {
    let harness = Harness::new().await?;
    harness.engine.register_metainfo(
        b"pack".to_vec(),
        handle("feed04", &[("a.bin", 10), ("b.bin", 10)]),
    );
    harness
        .orchestrator
        .add_torrent(TorrentSource::metainfo(b"pack".to_vec()))
        .await?;
    let hash = info_hash("feed04");
    harness.orchestrator.set_critical(&hash).await?;

    harness.orchestrator.delete_torrent(&hash).await?;
    assert!(harness.store.torrent(&hash).await?.is_none());
    assert!(harness.store.files(&hash).await?.is_empty());
    assert!(!harness.engine.has_session(&hash));
    assert!(harness.engine.calls().contains(&EngineCall::Remove {
        info_hash: hash.clone(),
        delete_files: true,
    }));
    assert_eq!(harness.orchestrator.get_state().critical, None);
    assert_eq!(harness.store.load_client_state().await?.critical, None);

    let err = harness
        .orchestrator
        .delete_torrent(&hash)
        .await
        .expect_err("already deleted");
    assert!(matches!(err, TorrentError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn delete_file_leaves_siblings_untouched() -> Result<()> {
    let harness = Harness::new().await?;
    harness.engine.register_metainfo(
        b"pack".to_vec(),
        handle("feed05", &[("a.bin", 10), ("b.bin", 10)]),
    );
    harness
        .orchestrator
        .add_torrent(TorrentSource::metainfo(b"pack".to_vec()))
        .await?;
    let hash = info_hash("feed05");
    harness
        .emit(Event::DownloadStarted {
            info_hash: hash.clone(),
        })
        .await?;
    let files = harness.orchestrator.torrent_files(&hash).await?;
    let target = files.iter().find(|file| file.path == "a.bin").context("a.bin")?;

    let err = harness
        .orchestrator
        .delete_file(target.id)
        .await
        .expect_err("file still downloading");
    assert!(matches!(err, TorrentError::InvalidState { .. }));

    harness
        .emit(Event::FileCompleted {
            info_hash: hash.clone(),
            path: "a.bin".into(),
        })
        .await?;
    harness.orchestrator.delete_file(target.id).await?;

    let remaining = harness.orchestrator.torrent_files(&hash).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].path, "b.bin");
    assert_eq!(remaining[0].state, FileState::Downloading);
    assert_eq!(harness.state("feed05").await?, TorrentState::Downloading);
    assert!(harness.engine.has_session(&hash));
    assert!(harness.engine.calls().contains(&EngineCall::RemoveFile {
        info_hash: hash.clone(),
        path: "a.bin".into(),
    }));
    assert_eq!(
        harness.engine.count_calls(|call| matches!(call, EngineCall::Remove { .. })),
        0
    );

    let err = harness
        .orchestrator
        .file(target.id)
        .await
        .expect_err("file record removed");
    assert!(matches!(err, TorrentError::FileNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn events_for_unknown_torrents_are_ignored() -> Result<()> {
    let harness = Harness::new().await?;
    harness
        .emit(Event::DownloadCompleted {
            info_hash: info_hash("ghost"),
        })
        .await?;
    assert!(harness.store.torrent(&info_hash("ghost")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn start_restores_sessions_and_scheduler_state() -> Result<()> {
    let harness = Harness::new().await?;
    let running = harness.downloading("aa01").await?;
    let paused = harness.downloading("aa02").await?;
    let finished = harness.downloading("aa03").await?;
    harness.orchestrator.pause_torrent(&paused).await?;
    harness
        .emit(Event::DownloadCompleted {
            info_hash: finished.clone(),
        })
        .await?;
    harness
        .orchestrator
        .set_download_speed_limit(Some(4_096))
        .await?;
    for hash in [&running, &paused, &finished] {
        harness.engine.drop_session(hash);
    }

    let restarted = harness.restart()?;
    let consumer = restarted.orchestrator.start().await?;
    assert_eq!(
        restarted.orchestrator.get_state().download_limit_bps,
        Some(4_096)
    );
    assert_eq!(harness.engine.limits().download_bps, Some(4_096));
    assert_eq!(harness.engine.is_paused(&running), Some(false));
    assert_eq!(harness.engine.is_paused(&paused), Some(true));
    assert!(!harness.engine.has_session(&finished));
    assert_eq!(harness.state("aa02").await?, TorrentState::Paused);
    consumer.abort();
    Ok(())
}

#[tokio::test]
async fn start_captures_failed_reattach_and_releases_critical() -> Result<()> {
    let harness = Harness::new().await?;
    let hash = harness.downloading("abc123").await?;
    harness.orchestrator.set_critical(&hash).await?;
    harness.engine.drop_session(&hash);

    let restarted = harness.restart()?;
    harness.engine.fail_next_add("metadata lookup timed out");
    let consumer = restarted.orchestrator.start().await?;

    let record = harness.record("abc123").await?;
    assert_eq!(record.state, TorrentState::Error);
    assert_eq!(
        record.error_message.as_deref(),
        Some("metadata lookup timed out")
    );
    assert_eq!(restarted.orchestrator.get_state().critical, None);
    consumer.abort();
    Ok(())
}

#[tokio::test]
async fn start_drops_critical_pointing_at_finished_torrent() -> Result<()> {
    let harness = Harness::new().await?;
    let hash = harness.downloading("abc123").await?;
    harness.orchestrator.set_critical(&hash).await?;
    harness
        .store
        .update_state(&hash, TorrentState::Finished, None)
        .await?;

    let restarted = harness.restart()?;
    let consumer = restarted.orchestrator.start().await?;
    assert_eq!(restarted.orchestrator.get_state().critical, None);
    assert_eq!(harness.store.load_client_state().await?.critical, None);
    consumer.abort();
    Ok(())
}

#[tokio::test]
async fn consumer_applies_published_engine_events() -> Result<()> {
    let harness = Harness::new().await?;
    harness.orchestrator.add_torrent(magnet("abc123")).await?;
    let consumer = harness.orchestrator.start().await?;
    let mut stream = harness.events.subscribe();

    let _ = harness.events.publish(Event::DownloadStarted {
        info_hash: info_hash("abc123"),
    });
    next_event(&mut stream, |event| {
        matches!(
            event,
            Event::StateChanged {
                to: TorrentState::Downloading,
                ..
            }
        )
    })
    .await?;
    assert_eq!(harness.state("abc123").await?, TorrentState::Downloading);
    consumer.abort();
    Ok(())
}

#[tokio::test]
async fn lagging_consumer_resyncs_dropped_completion() -> Result<()> {
    let harness = Harness::with_bus_capacity(8).await?;
    let finished = info_hash("aa01");
    harness.orchestrator.add_torrent(magnet("aa01")).await?;
    harness.orchestrator.add_torrent(magnet("bb01")).await?;
    harness.orchestrator.set_critical(&finished).await?;
    let consumer = harness.orchestrator.start().await?;

    // The engine now reports aa01 complete, but its completion event is
    // buried under a burst the consumer cannot keep up with.
    harness.engine.set_status(&finished, SessionStatus::Seeding);
    let _ = harness.events.publish(Event::DownloadStarted {
        info_hash: finished.clone(),
    });
    let _ = harness.events.publish(Event::DownloadCompleted {
        info_hash: finished.clone(),
    });
    for downloaded in 0..20 {
        let _ = harness.events.publish(Event::Progress {
            info_hash: info_hash("bb01"),
            downloaded_bytes: downloaded,
            total_bytes: 100,
            files: Vec::new(),
        });
    }
    let mut stream = harness.events.subscribe();

    next_event(&mut stream, |event| {
        matches!(
            event,
            Event::StateChanged {
                to: TorrentState::Finished,
                ..
            }
        )
    })
    .await?;
    assert_eq!(harness.state("aa01").await?, TorrentState::Finished);
    assert_eq!(harness.orchestrator.get_state().critical, None);
    assert_eq!(harness.store.load_client_state().await?.critical, None);
    assert_eq!(harness.state("bb01").await?, TorrentState::Queued);
    consumer.abort();
    Ok(())
}

#[tokio::test]
async fn resync_applies_failures_and_file_completions() -> Result<()> {
    let harness = Harness::new().await?;
    harness
        .engine
        .register_metainfo(b"pack".to_vec(), handle("feed01", &[("a.bin", 60), ("b.bin", 40)]));
    harness
        .orchestrator
        .add_torrent(TorrentSource::metainfo(b"pack".to_vec()))
        .await?;
    let hash = info_hash("feed01");
    harness.engine.set_file_progress(&hash, "a.bin", 60, 60);
    harness.engine.set_status(
        &hash,
        SessionStatus::Failed {
            message: "No space left on device (os error 28)".into(),
        },
    );

    harness.orchestrator.resync().await?;

    let record = harness.record("feed01").await?;
    assert_eq!(record.state, TorrentState::Error);
    assert_eq!(
        record.error_message.as_deref(),
        Some("No space left on device (os error 28)")
    );
    let files = harness.orchestrator.torrent_files(&hash).await?;
    let states: Vec<_> = files
        .iter()
        .map(|file| (file.path.as_str(), file.state))
        .collect();
    assert_eq!(
        states,
        [("a.bin", FileState::Finished), ("b.bin", FileState::Downloading)]
    );
    Ok(())
}
