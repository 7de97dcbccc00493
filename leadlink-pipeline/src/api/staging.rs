//! CSV staging endpoint
//!
//! POST /ingest/csv accepts base64 file bytes plus tenant/source identity
//! and returns the batch id. Idempotent on the file's content hash.

use axum::{extract::State, routing::post, Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::services::{BlobStore, IngestionStager};
use crate::AppState;

/// POST /ingest/csv request
#[derive(Debug, Deserialize)]
pub struct StageCsvRequest {
    pub tenant_id: String,
    pub source_slug: String,
    pub filename: String,
    pub bytes_base64: String,
    #[serde(default)]
    pub origin: Option<serde_json::Value>,
}

/// POST /ingest/csv response
#[derive(Debug, Serialize)]
pub struct StageCsvResponse {
    pub batch_id: String,
    pub deduplicated: bool,
}

/// POST /ingest/csv
pub async fn stage_csv(
    State(state): State<AppState>,
    Json(request): Json<StageCsvRequest>,
) -> ApiResult<Json<StageCsvResponse>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&request.bytes_base64)
        .map_err(|e| ApiError::BadRequest(format!("Invalid base64 payload: {}", e)))?;

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Empty file".to_string()));
    }

    let stager = IngestionStager::new(
        state.db.clone(),
        BlobStore::new(state.config.storage_root.clone()),
        state.event_bus.clone(),
    );

    let outcome = stager
        .stage_csv(
            &request.tenant_id,
            &request.source_slug,
            &request.filename,
            &bytes,
            request.origin,
        )
        .await?;

    Ok(Json(StageCsvResponse {
        batch_id: outcome.batch_id,
        deduplicated: outcome.deduplicated,
    }))
}

/// Build staging routes
pub fn staging_routes() -> Router<AppState> {
    Router::new().route("/ingest/csv", post(stage_csv))
}
