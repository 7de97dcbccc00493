//! leadlink-pipeline library interface
//!
//! Exposes the pipeline's modules for integration testing. The binary in
//! `main.rs` wires these together behind the HTTP surface and the worker
//! loops.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod workers;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use leadlink_common::config::ServiceConfig;
use leadlink_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers and workers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (also the work queue for every stage)
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service configuration
    pub config: Arc<ServiceConfig>,
    /// Service start time, for health reporting
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, config: ServiceConfig) -> Self {
        Self {
            db,
            event_bus,
            config: Arc::new(config),
            startup_time: chrono::Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::staging_routes())
        .merge(api::review_routes())
        .merge(api::admin_routes())
        .merge(api::health_routes())
        .route("/events", get(api::pipeline_event_stream))
        .with_state(state)
}
