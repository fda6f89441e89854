//! Wanted item API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use bookbag_core::{
    library::{ItemKind, NewWantedItem, SnatchRecord, WantedFilter},
    scheduler::ItemSearchResult,
    SchedulerError, WantedItem, WantedStatus,
};

use crate::state::AppState;

/// Maximum allowed limit for list queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for list queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing wanted items
#[derive(Debug, Deserialize)]
pub struct ListWantedParams {
    /// Filter by status (wanted, snatched, processed, failed)
    pub status: Option<String>,
    /// Filter by kind (book, magazine)
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListWantedResponse {
    pub items: Vec<WantedItem>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// A wanted item with its snatch history, newest first
#[derive(Debug, Serialize)]
pub struct WantedDetailResponse {
    #[serde(flatten)]
    pub item: WantedItem,
    pub snatches: Vec<SnatchRecord>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct WantedErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<WantedErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(WantedErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Add a book or magazine issue to the wanted list
pub async fn add_wanted(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewWantedItem>,
) -> Result<(StatusCode, Json<WantedItem>), ApiError> {
    if body.title.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "title cannot be empty"));
    }
    if body.kind == ItemKind::Magazine && body.issue_date.is_none() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "magazine issues need an issue_date",
        ));
    }

    let item = state.store().add_wanted(body).map_err(internal)?;
    info!(wanted_id = %item.id, title = %item.title, kind = %item.kind.as_str(), "Added wanted item");
    Ok((StatusCode::CREATED, Json(item)))
}

/// List wanted items with optional filters
pub async fn list_wanted(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListWantedParams>,
) -> Result<Json<ListWantedResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = WantedFilter::new();
    if let Some(ref status) = params.status {
        let status: WantedStatus = status
            .parse()
            .map_err(|_| error(StatusCode::BAD_REQUEST, format!("unknown status: {}", status)))?;
        filter = filter.with_status(status);
    }
    if let Some(ref kind) = params.kind {
        let kind: ItemKind = kind
            .parse()
            .map_err(|_| error(StatusCode::BAD_REQUEST, format!("unknown kind: {}", kind)))?;
        filter = filter.with_kind(kind);
    }

    let total = state.store().count_wanted(&filter).map_err(internal)?;
    let items = state
        .store()
        .list_wanted(&filter.with_limit(limit).with_offset(offset))
        .map_err(internal)?;

    Ok(Json(ListWantedResponse {
        items,
        total,
        limit,
        offset,
    }))
}

/// Get a wanted item by ID
pub async fn get_wanted(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WantedDetailResponse>, ApiError> {
    let item = state
        .store()
        .get_wanted(&id)
        .map_err(internal)?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("Wanted item not found: {}", id)))?;
    let snatches = state.store().snatches_for(&id).map_err(internal)?;

    Ok(Json(WantedDetailResponse { item, snatches }))
}

/// Search for one item now
pub async fn force_search(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemSearchResult>, ApiError> {
    state
        .scheduler()
        .force_search(&id)
        .await
        .map(Json)
        .map_err(|e| match e {
            SchedulerError::WantedNotFound(_) => error(StatusCode::NOT_FOUND, e.to_string()),
            SchedulerError::InvalidState { .. } => error(StatusCode::CONFLICT, e.to_string()),
            e if e.is_retryable() => error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            e => internal(e),
        })
}
