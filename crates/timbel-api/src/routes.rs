//! API route definitions.

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, logs, pipelines, reports, stages};
use crate::middleware::{cors_layer, request_id, require_auth};
use crate::state::AppState;
use crate::ws;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            api_routes().route_layer(from_fn_with_state(state.clone(), require_auth)),
        )
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .with_state(state)
}

/// The router with request ids, CORS and HTTP tracing applied.
pub fn build_app(state: AppState) -> Router {
    create_router(Arc::new(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(from_fn(request_id))
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/pipelines", pipeline_routes())
        .route("/metrics", get(reports::pipeline_metrics))
        .route("/history", get(reports::pipeline_history))
        .route("/ws", get(ws::ws_handler))
}

fn pipeline_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(pipelines::register_pipeline))
        .route("/active", get(pipelines::list_active_pipelines))
        .route("/summary", get(pipelines::pipeline_summary))
        .route(
            "/{id}/status",
            get(pipelines::get_pipeline_status).put(pipelines::update_pipeline_status),
        )
        .route("/{id}/stages/{stage_id}", put(stages::update_stage))
        .route("/{id}/logs", get(logs::read_logs).post(logs::append_logs))
        .route("/{id}/cancel", post(pipelines::cancel_pipeline))
        .route("/{id}/restart", post(pipelines::restart_pipeline))
}
