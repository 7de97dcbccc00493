//! Review queue endpoints
//!
//! Approve/reject a pending match candidate. Both return 409 when the
//! candidate has already been resolved or expired.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiResult;
use crate::services::ReviewResolver;
use crate::AppState;

/// Request body shared by approve and reject
#[derive(Debug, Deserialize)]
pub struct ReviewDecisionRequest {
    pub reviewer_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// POST /review/candidates/{id}/approve response
#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub match_id: String,
}

/// POST /review/candidates/{id}/approve
pub async fn approve_candidate(
    State(state): State<AppState>,
    Path(candidate_id): Path<String>,
    Json(request): Json<ReviewDecisionRequest>,
) -> ApiResult<Json<ApproveResponse>> {
    let resolver = ReviewResolver::new(state.db.clone(), state.event_bus.clone());
    let match_id = resolver
        .approve(&candidate_id, &request.reviewer_id, request.notes.as_deref())
        .await?;

    Ok(Json(ApproveResponse { match_id }))
}

/// POST /review/candidates/{id}/reject
pub async fn reject_candidate(
    State(state): State<AppState>,
    Path(candidate_id): Path<String>,
    Json(request): Json<ReviewDecisionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let resolver = ReviewResolver::new(state.db.clone(), state.event_bus.clone());
    resolver
        .reject(&candidate_id, &request.reviewer_id, request.notes.as_deref())
        .await?;

    Ok(Json(json!({ "ok": true })))
}

/// Build review routes
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/review/candidates/:candidate_id/approve", post(approve_candidate))
        .route("/review/candidates/:candidate_id/reject", post(reject_candidate))
}
