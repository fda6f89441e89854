use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, middleware::metrics_middleware, postprocess, wanted};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health, config and status
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        // Wanted items
        .route("/wanted", post(wanted::add_wanted))
        .route("/wanted", get(wanted::list_wanted))
        .route("/wanted/{id}", get(wanted::get_wanted))
        .route("/wanted/{id}/search", post(wanted::force_search))
        // Post-processing
        .route("/postprocess", post(postprocess::force_postprocess))
        .route("/discovered", get(postprocess::list_discovered));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
