//! Stage transition handler.

use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use timbel_core::ids::StageId;
use timbel_core::pipeline::PipelineStatus;
use timbel_core::stage::StageStatus;
use timbel_trace::stage_span;
use tracing::Instrument;

use crate::error::ApiError;
use crate::extract::{ApiJson, pipeline_id};
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateStageRequest {
    pub status: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageUpdated {
    pub stage_id: StageId,
    pub status: StageStatus,
    pub previous_status: StageStatus,
    /// Milliseconds, once the stage has finished.
    pub duration: Option<u64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub data: Map<String, Value>,
    pub pipeline_status: PipelineStatus,
}

pub async fn update_stage(
    State(state): State<Arc<AppState>>,
    Path((id, stage_id)): Path<(String, String)>,
    ApiJson(request): ApiJson<UpdateStageRequest>,
) -> Result<ApiResponse<StageUpdated>, ApiError> {
    let id = pipeline_id(&id)?;
    let stage_id = StageId::new(stage_id);
    let status: StageStatus = request.status.parse()?;

    let update = state
        .monitor
        .advance_stage(id, &stage_id, status, request.data)
        .instrument(stage_span("stage.update", &id.to_string(), stage_id.as_str()))
        .await?;

    let stage = update.stage;
    Ok(ApiResponse::ok(
        StageUpdated {
            stage_id: stage.id,
            status: stage.status,
            previous_status: update.previous_status,
            duration: stage.duration_ms,
            start_time: stage.start_time,
            end_time: stage.end_time,
            data: stage.data,
            pipeline_status: update.pipeline_status,
        },
        "Stage updated",
    ))
}
