//! Administrative worker kick endpoints
//!
//! Each endpoint runs one pass of a worker that otherwise polls on its
//! own cadence. All kicks are idempotent; they return the pass's stats.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::services::{
    BlobStore, CrmPuller, EmbeddingClient, EmbeddingWorker, IngestionStager, Matcher,
    ReviewResolver, Transformer,
};
use crate::AppState;

/// POST /admin/run/transformer
///
/// Runs a parse pass (pending batches) followed by a transform pass
/// (parsed batches), so a freshly staged batch flows to canonical leads
/// in one kick.
pub async fn run_transformer(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stager = IngestionStager::new(
        state.db.clone(),
        BlobStore::new(state.config.storage_root.clone()),
        state.event_bus.clone(),
    );
    let parsed_batches = stager.process_pending().await?;

    let transformer = Transformer::new(state.db.clone(), state.event_bus.clone());
    let new_leads = transformer.process_parsed().await?;

    Ok(Json(json!({
        "parsed_batches": parsed_batches,
        "leads_created": new_leads.len(),
    })))
}

/// POST /admin/run/matcher
pub async fn run_matcher(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let matcher = Matcher::new(
        state.db.clone(),
        state.event_bus.clone(),
        state.config.workers.candidate_ttl_days,
    );
    let stats = matcher.run_pending().await?;

    let resolver = ReviewResolver::new(state.db.clone(), state.event_bus.clone());
    let expired = resolver.expire_overdue().await?;

    Ok(Json(json!({
        "processed": stats.processed,
        "auto_matched": stats.auto_matched,
        "sent_to_review": stats.sent_to_review,
        "unmatched": stats.unmatched,
        "errors": stats.errors,
        "candidates_expired": expired,
    })))
}

/// POST /admin/run/embeddings
pub async fn run_embeddings(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let client = EmbeddingClient::new(&state.config.embedding, state.config.embedding_timeout())?;
    let worker = EmbeddingWorker::new(
        state.db.clone(),
        Arc::new(client),
        state.event_bus.clone(),
        state.config.workers.embed_batch_size,
        state.config.workers.max_attempts,
    );
    let stats = worker.run_once().await?;

    Ok(Json(json!({
        "claimed": stats.claimed,
        "completed": stats.completed,
        "failed": stats.failed,
        "pending_count": stats.pending_count,
        "failed_count": stats.failed_count,
    })))
}

/// POST /admin/run/crm-sync request
#[derive(Debug, Default, Deserialize)]
pub struct RunCrmSyncRequest {
    #[serde(default)]
    pub force_full: bool,
}

/// POST /admin/run/crm-sync
pub async fn run_crm_sync(
    State(state): State<AppState>,
    body: Option<Json<RunCrmSyncRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    let force_full = body.map(|Json(b)| b.force_full).unwrap_or(false);

    let puller = CrmPuller::new(
        state.db.clone(),
        state.event_bus.clone(),
        state.config.crm_timeout(),
    );
    let runs = puller.sync_all(force_full).await?;

    let summaries: Vec<serde_json::Value> = runs
        .iter()
        .map(|s| {
            json!({
                "records_fetched": s.records_fetched,
                "records_created": s.records_created,
                "records_updated": s.records_updated,
                "errors": s.errors.len(),
            })
        })
        .collect();

    Ok(Json(json!({ "connections_synced": runs.len(), "runs": summaries })))
}

/// Build admin routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/run/transformer", post(run_transformer))
        .route("/admin/run/matcher", post(run_matcher))
        .route("/admin/run/embeddings", post(run_embeddings))
        .route("/admin/run/crm-sync", post(run_crm_sync))
}
