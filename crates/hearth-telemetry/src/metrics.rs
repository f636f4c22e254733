//! Prometheus-backed metrics registry and snapshot helpers.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus registry tracking orchestrator activity.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    events_processed_total: IntCounterVec,
    engine_errors_total: IntCounter,
    checkpoints_total: IntCounter,
    managed_torrents: IntGauge,
    active_sessions: IntGauge,
    download_bps: IntGauge,
    upload_bps: IntGauge,
}

/// Point-in-time view of the gauges and totals.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Torrents known to the record store.
    pub managed_torrents: i64,
    /// Engine sessions currently allowed to transfer.
    pub active_sessions: i64,
    /// Aggregate download rate in bytes per second.
    pub download_bps: i64,
    /// Aggregate upload rate in bytes per second.
    pub upload_bps: i64,
    /// Engine failures captured into torrent records.
    pub engine_errors_total: u64,
    /// Durable progress checkpoints written.
    pub checkpoints_total: u64,
}

impl Metrics {
    /// Construct a registry with every collector registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_processed_total = register(
            &registry,
            "events_processed_total",
            IntCounterVec::new(
                Opts::new("events_processed_total", "Engine events processed by kind"),
                &["kind"],
            ),
        )?;
        let engine_errors_total = register(
            &registry,
            "engine_errors_total",
            IntCounter::with_opts(Opts::new(
                "engine_errors_total",
                "Engine failures captured into torrent records",
            )),
        )?;
        let checkpoints_total = register(
            &registry,
            "progress_checkpoints_total",
            IntCounter::with_opts(Opts::new(
                "progress_checkpoints_total",
                "Durable progress checkpoints written",
            )),
        )?;
        let managed_torrents = register(
            &registry,
            "managed_torrents",
            IntGauge::with_opts(Opts::new("managed_torrents", "Torrents in the record store")),
        )?;
        let active_sessions = register(
            &registry,
            "active_sessions",
            IntGauge::with_opts(Opts::new(
                "active_sessions",
                "Engine sessions allowed to transfer",
            )),
        )?;
        let download_bps = register(
            &registry,
            "download_bytes_per_second",
            IntGauge::with_opts(Opts::new(
                "download_bytes_per_second",
                "Aggregate download rate",
            )),
        )?;
        let upload_bps = register(
            &registry,
            "upload_bytes_per_second",
            IntGauge::with_opts(Opts::new("upload_bytes_per_second", "Aggregate upload rate")),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                events_processed_total,
                engine_errors_total,
                checkpoints_total,
                managed_torrents,
                active_sessions,
                download_bps,
                upload_bps,
            }),
        })
    }

    /// Count one processed engine event.
    pub fn inc_event(&self, kind: &str) {
        self.inner
            .events_processed_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Count one captured engine failure.
    pub fn inc_engine_error(&self) {
        self.inner.engine_errors_total.inc();
    }

    /// Count one durable progress checkpoint.
    pub fn inc_checkpoint(&self) {
        self.inner.checkpoints_total.inc();
    }

    /// Set the managed torrent gauge.
    pub fn set_managed_torrents(&self, count: usize) {
        self.inner.managed_torrents.set(saturate(count as u64));
    }

    /// Set the active session gauge.
    pub fn set_active_sessions(&self, count: usize) {
        self.inner.active_sessions.set(saturate(count as u64));
    }

    /// Record the aggregate transfer rates.
    pub fn set_transfer_rates(&self, download_bps: u64, upload_bps: u64) {
        self.inner.download_bps.set(saturate(download_bps));
        self.inner.upload_bps.set(saturate(upload_bps));
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or yields invalid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::Render { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::RenderUtf8 { source })
    }

    /// Take a snapshot of the gauges and totals.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            managed_torrents: self.inner.managed_torrents.get(),
            active_sessions: self.inner.active_sessions.get(),
            download_bps: self.inner.download_bps.get(),
            upload_bps: self.inner.upload_bps.get(),
            engine_errors_total: self.inner.engine_errors_total.get(),
            checkpoints_total: self.inner.checkpoints_total.get(),
        }
    }
}

fn register<C>(
    registry: &Registry,
    name: &'static str,
    collector: prometheus::Result<C>,
) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    let collector = collector.map_err(|source| TelemetryError::MetricSetup { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricSetup { name, source })?;
    Ok(collector)
}

fn saturate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
