//! Service wiring: configuration, logging, record store, engine, and the
//! orchestrator, then wait for shutdown.

use std::sync::Arc;

use tracing::{info, warn};

use hearth_config::HearthConfig;
use hearth_data::SqliteTorrentStore;
use hearth_events::EventBus;
use hearth_telemetry::{AppSpanGuard, Metrics};
use hearth_torrent_engine::{EngineOptions, EngineSession, SessionEngine};

use crate::error::{AppError, AppResult};
use crate::orchestrator::{OrchestratorOptions, TorrentOrchestrator};

const SERVICE_NAME: &str = "hearth";
const BUILD_SHA: &str = match option_env!("HEARTH_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Orchestrator wired to the production engine and record store.
pub type AppOrchestrator = TorrentOrchestrator<SessionEngine, SqliteTorrentStore>;

/// Entry point for the Hearth boot sequence.
///
/// # Errors
///
/// Returns an error if configuration is invalid or any service fails to start.
pub async fn run_app() -> AppResult<()> {
    let config =
        HearthConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
    run_app_with(config).await
}

/// Boot sequence driven by an explicit configuration.
///
/// # Errors
///
/// Returns an error if logging, the record store, the engine, or the
/// orchestrator fails to start.
pub async fn run_app_with(config: HearthConfig) -> AppResult<()> {
    hearth_telemetry::init_logging(&config.logging(BUILD_SHA))
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _span = AppSpanGuard::new(SERVICE_NAME);
    info!(
        download_dir = %config.download_dir.display(),
        checkpoint_secs = config.checkpoint_interval.as_secs(),
        "Hearth bootstrap starting"
    );

    let (orchestrator, consumer) = start_services(&config).await?;
    info!(
        paused = orchestrator.get_state().paused,
        "torrent orchestrator ready"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
    consumer.abort();
    Ok(())
}

/// Build the record store, event bus, metrics, engine, and a started
/// orchestrator.
///
/// # Errors
///
/// Returns an error if any collaborator fails to initialise.
pub async fn start_services(
    config: &HearthConfig,
) -> AppResult<(Arc<AppOrchestrator>, tokio::task::JoinHandle<()>)> {
    let store = connect_store(config).await?;
    let events = EventBus::new();
    let engine = SessionEngine::start(events.clone(), engine_options(config))
        .await
        .map_err(|err| AppError::engine("engine.start", &err))?;
    launch(config, store, events, engine).await
}

/// [`start_services`] around an explicit engine session instead of the one
/// selected for this build.
///
/// # Errors
///
/// Returns an error if any collaborator fails to initialise.
pub async fn start_services_with_session(
    config: &HearthConfig,
    session: Box<dyn EngineSession>,
) -> AppResult<(Arc<AppOrchestrator>, tokio::task::JoinHandle<()>)> {
    let store = connect_store(config).await?;
    let events = EventBus::new();
    let engine = SessionEngine::start_with_session(events.clone(), engine_options(config), session)
        .await
        .map_err(|err| AppError::engine("engine.start", &err))?;
    launch(config, store, events, engine).await
}

async fn connect_store(config: &HearthConfig) -> AppResult<SqliteTorrentStore> {
    SqliteTorrentStore::connect(&config.database_url)
        .await
        .map_err(|err| AppError::data("store.connect", err))
}

fn engine_options(config: &HearthConfig) -> EngineOptions {
    EngineOptions {
        download_root: config.download_dir.clone(),
        poll_interval: config.engine_poll_interval,
        add_timeout: config.engine_add_timeout,
    }
}

async fn launch(
    config: &HearthConfig,
    store: SqliteTorrentStore,
    events: EventBus,
    engine: SessionEngine,
) -> AppResult<(Arc<AppOrchestrator>, tokio::task::JoinHandle<()>)> {
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let orchestrator = Arc::new(TorrentOrchestrator::new(
        Arc::new(engine),
        Arc::new(store),
        events,
        metrics,
        OrchestratorOptions::from(config),
    ));
    let consumer = orchestrator
        .start()
        .await
        .map_err(|err| AppError::torrent("orchestrator.start", err))?;
    Ok((orchestrator, consumer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_torrent_core::InfoHash;
    use hearth_torrent_engine::StubSession;

    #[tokio::test]
    async fn services_start_against_memory_store() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut config = HearthConfig::with_database_url("sqlite::memory:");
        config.download_dir = root.path().join("downloads");

        let (orchestrator, consumer) =
            start_services_with_session(&config, Box::new(StubSession::default())).await?;
        assert!(config.download_dir.is_dir());
        assert_eq!(orchestrator.get_state(), hearth_torrent_core::ClientState::default());
        assert!(orchestrator.list_torrents(0).await?.items.is_empty());

        let missing = InfoHash::parse("abc123")?;
        assert!(orchestrator.torrent(&missing).await.is_err());
        consumer.abort();
        Ok(())
    }

    #[tokio::test]
    async fn invalid_database_url_is_a_data_error() {
        let root = tempfile::tempdir().expect("tempdir");
        let unreachable = root.path().join("missing").join("hearth.db");
        let mut config =
            HearthConfig::with_database_url(format!("sqlite://{}", unreachable.display()));
        config.download_dir = root.path().to_path_buf();

        let Err(err) = start_services(&config).await else {
            panic!("a database in a missing directory must not open");
        };
        assert!(matches!(err, AppError::Data { operation: "store.connect", .. }));
    }
}
