//! leadlink-pipeline - Lead Pipeline Microservice
//!
//! Stages heterogeneous real-estate lead CSVs, normalizes them into
//! canonical leads, and probabilistically matches each against the
//! tenant's mirrored CRM dataset. The embedding queue and CRM pull sync
//! run as independent worker loops beside the ingest → transform → match
//! chain; the database is the only queue.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadlink_common::config::ServiceConfig;
use leadlink_common::db::init_database_pool;
use leadlink_common::events::EventBus;

use leadlink_pipeline::services::EmbeddingClient;
use leadlink_pipeline::{build_router, workers, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting leadlink-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1);
    let config = ServiceConfig::load(config_path.as_deref())?;
    info!("Database: {}", config.database_path.display());
    info!("Storage root: {}", config.storage_root.display());

    let db_pool = init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(1000);

    let bind_address = config.bind_address.clone();
    let provider = Arc::new(EmbeddingClient::new(
        &config.embedding,
        config.embedding_timeout(),
    )?);

    let state = AppState::new(db_pool, event_bus, config);

    // Worker loops poll their queues until cancelled
    let cancel = CancellationToken::new();
    let worker_handles = workers::spawn_workers(&state, provider, cancel.clone());

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Let in-flight worker passes finish before exit
    cancel.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
    cancel.cancel();
}
