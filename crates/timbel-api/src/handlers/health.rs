//! Health check handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde::Serialize;
use std::sync::Arc;
use timbel_monitor::HealthCheck;

use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub check: HealthCheck,
}

/// 200 while the monitor can serve requests, 503 otherwise.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let check = state.monitor.health().await;
    let operational = check.status.is_operational();
    let body = HealthResponse {
        version: env!("CARGO_PKG_VERSION"),
        check,
    };

    if operational {
        ApiResponse::ok(body, "Service healthy").with_status(StatusCode::OK)
    } else {
        let mut response = ApiResponse::ok(body, "Service unavailable");
        response.success = false;
        response.error = Some("service_unavailable".to_string());
        response.with_status(StatusCode::SERVICE_UNAVAILABLE)
    }
}

pub async fn ready(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.monitor.health().await.store_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
