//! Harness shared by the orchestrator suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hearth_app::{OrchestratorOptions, TorrentOrchestrator};
use hearth_data::SqliteTorrentStore;
use hearth_events::{Event, EventBus, InfoHash, TorrentState};
use hearth_telemetry::Metrics;
use hearth_test_support::FakeEngine;
use hearth_test_support::fixtures::info_hash;
use hearth_torrent_core::{SessionHandle, TorrentRecord, TorrentRepository};

pub type Orchestrator = TorrentOrchestrator<FakeEngine, SqliteTorrentStore>;

pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub store: Arc<SqliteTorrentStore>,
    pub events: EventBus,
    pub metrics: Metrics,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        let engine = Arc::new(FakeEngine::new());
        let store = Arc::new(SqliteTorrentStore::in_memory().await?);
        Self::with(engine, store, EventBus::new())
    }

    /// A harness whose bus holds only `capacity` undelivered events.
    pub async fn with_bus_capacity(capacity: usize) -> Result<Self> {
        let engine = Arc::new(FakeEngine::new());
        let store = Arc::new(SqliteTorrentStore::in_memory().await?);
        Self::with(engine, store, EventBus::with_capacity(capacity))
    }

    /// A fresh orchestrator over the same engine and store, as after a
    /// process restart.
    pub fn restart(&self) -> Result<Self> {
        Self::with(
            Arc::clone(&self.engine),
            Arc::clone(&self.store),
            EventBus::new(),
        )
    }

    fn with(
        engine: Arc<FakeEngine>,
        store: Arc<SqliteTorrentStore>,
        events: EventBus,
    ) -> Result<Self> {
        let metrics = Metrics::new()?;
        let orchestrator = Arc::new(TorrentOrchestrator::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            events.clone(),
            metrics.clone(),
            OrchestratorOptions {
                checkpoint_interval: Duration::from_secs(30),
                restore_sessions: true,
            },
        ));
        Ok(Self {
            engine,
            store,
            events,
            metrics,
            orchestrator,
        })
    }

    pub async fn record(&self, raw: &str) -> Result<TorrentRecord> {
        self.store
            .torrent(&info_hash(raw))
            .await?
            .with_context(|| format!("torrent {raw} should exist"))
    }

    pub async fn state(&self, raw: &str) -> Result<TorrentState> {
        Ok(self.record(raw).await?.state)
    }

    pub async fn emit(&self, event: Event) -> Result<()> {
        self.orchestrator.handle_event(&event).await?;
        Ok(())
    }

    /// Add a magnet torrent and report that its download started.
    pub async fn downloading(&self, raw: &str) -> Result<InfoHash> {
        self.orchestrator
            .add_torrent(hearth_test_support::fixtures::magnet(raw))
            .await?;
        let hash = info_hash(raw);
        self.emit(Event::DownloadStarted {
            info_hash: hash.clone(),
        })
        .await?;
        Ok(hash)
    }
}

pub fn handle(raw: &str, files: &[(&str, u64)]) -> SessionHandle {
    SessionHandle {
        info_hash: info_hash(raw),
        name: Some(format!("{raw}.name")),
        size_bytes: Some(files.iter().map(|(_, size)| size).sum()),
        files: files
            .iter()
            .map(|(path, size)| hearth_test_support::fixtures::discovered(path, *size))
            .collect(),
    }
}

pub fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}
