//! Log ingestion and read-back.

use axum::extract::{Path, State};
use serde::Deserialize;
use std::sync::Arc;
use timbel_core::ids::StageId;
use timbel_core::logs::{LogEntry, LogInput};
use timbel_monitor::LogsAccepted;
use timbel_trace::stage_span;
use tracing::Instrument;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery, pipeline_id};
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendLogsRequest {
    pub stage_id: String,
    pub logs: Vec<LogInput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogParams {
    pub stage_id: Option<String>,
    /// Only entries with a greater sequence number.
    pub after: Option<u64>,
    pub limit: Option<u32>,
}

pub async fn append_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<AppendLogsRequest>,
) -> Result<ApiResponse<LogsAccepted>, ApiError> {
    let id = pipeline_id(&id)?;
    let stage_id = StageId::new(request.stage_id);

    let accepted = state
        .monitor
        .stream_logs(id, &stage_id, request.logs)
        .instrument(stage_span("stage.logs", &id.to_string(), stage_id.as_str()))
        .await?;

    let message = format!("{} log lines accepted", accepted.logs_count);
    Ok(ApiResponse::ok(accepted, message))
}

pub async fn read_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiQuery(params): ApiQuery<LogParams>,
) -> Result<ApiResponse<Vec<LogEntry>>, ApiError> {
    let entries = state
        .monitor
        .logs(
            pipeline_id(&id)?,
            params.stage_id.map(StageId::new),
            params.after,
            params.limit,
        )
        .await?;

    let message = format!("{} log lines", entries.len());
    Ok(ApiResponse::ok(entries, message))
}
