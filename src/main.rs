//! Ingestor binary.
//!
//! Reads configuration from the environment (and `.env`), ingests until SIGINT
//! or SIGTERM, then stops every worker and closes the store.

use solana_ingestor::utils::logging;
use solana_ingestor::{
    DefaultRpcProvider, IngestConfig, MemoryStore, Orchestrator, PgStore, RecordStore, Result,
    WebSocketSubscriber,
};
use std::sync::Arc;

const MEMORY_STORE_URL: &str = "memory://";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    #[cfg(feature = "telemetry")]
    solana_ingestor::telemetry::init_telemetry(
        &solana_ingestor::telemetry::TelemetryConfig::from_env(),
    );

    let config = IngestConfig::from_env()?;
    let settings = config.settings();
    logging::log_startup(&config.rpc_url, &config.ws_url, config.programs.len());

    let store: Arc<dyn RecordStore> = if config.database_url.starts_with(MEMORY_STORE_URL) {
        tracing::warn!("Using in-memory store, nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PgStore::connect(&config.database_url).await?)
    };
    store.initialize().await?;

    let rpc = Arc::new(DefaultRpcProvider::new(
        &config.rpc_url,
        settings.commitment,
        config.request_timeout(),
    )?);
    let push = Arc::new(WebSocketSubscriber::new(
        config.ws_url.clone(),
        settings.commitment,
    ));

    let mut orchestrator = Orchestrator::new(settings, rpc, Arc::clone(&store), push);
    orchestrator.start_all(&config.programs);

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    orchestrator.stop_all();
    store.close().await;
    tracing::info!("Ingestor stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
