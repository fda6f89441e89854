//! Post-process API handlers.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use bookbag_core::{
    library::{DiscoveredFile, ReconcileState},
    postprocess::ReconcileSummary,
};

use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListDiscoveredParams {
    /// Reconcile state; defaults to unidentified files awaiting review
    pub state: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListDiscoveredResponse {
    pub files: Vec<DiscoveredFile>,
    pub state: ReconcileState,
}

#[derive(Debug, Serialize)]
pub struct PostprocessErrorResponse {
    pub error: String,
}

/// Run one post-process pass now
pub async fn force_postprocess(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileSummary>, impl IntoResponse> {
    state
        .scheduler()
        .force_postprocess()
        .await
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PostprocessErrorResponse {
                    error: e.to_string(),
                }),
            )
        })
}

/// List discovered files in one reconcile state
pub async fn list_discovered(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDiscoveredParams>,
) -> Result<Json<ListDiscoveredResponse>, (StatusCode, Json<PostprocessErrorResponse>)> {
    let reconcile_state = match params.state.as_deref() {
        None => ReconcileState::Unidentified,
        Some(s) => s.parse().map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(PostprocessErrorResponse {
                    error: format!("unknown state: {}", s),
                }),
            )
        })?,
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match state.store().list_discovered(reconcile_state, limit) {
        Ok(files) => Ok(Json(ListDiscoveredResponse {
            files,
            state: reconcile_state,
        })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(PostprocessErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}
