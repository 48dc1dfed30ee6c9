//! Pipeline lifecycle handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use timbel_core::ids::{PipelineId, StageId};
use timbel_core::pipeline::{Pipeline, PipelineStatus, RegisterPipeline, StatusMetadata};
use timbel_core::query::PipelineSummary;
use timbel_core::stage::Stage;
use timbel_monitor::{PipelineStatusView, StatusUpdate};
use timbel_trace::pipeline_span;
use tracing::Instrument;

use crate::error::ApiError;
use crate::extract::{ApiJson, Caller, pipeline_id};
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCreated {
    pub pipeline_id: PipelineId,
    pub status: PipelineStatus,
    pub stages: Vec<Stage>,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restarted_from: Option<PipelineId>,
}

impl From<Pipeline> for PipelineCreated {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            pipeline_id: pipeline.id,
            status: pipeline.status,
            stages: pipeline.stages,
            queued_at: pipeline.queued_at,
            restarted_from: pipeline.restarted_from,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub metadata: Option<StatusMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRequest {
    pub from_stage: Option<String>,
}

/// Parse an optional JSON body; an empty body yields the default.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

pub async fn register_pipeline(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    ApiJson(mut request): ApiJson<RegisterPipeline>,
) -> Result<Response, ApiError> {
    request.triggered_by = caller.actor(request.triggered_by);
    let pipeline = state.monitor.register(request).await?;

    Ok(ApiResponse::ok(
        PipelineCreated::from(pipeline),
        "Pipeline registered",
    )
    .with_status(StatusCode::CREATED))
}

pub async fn get_pipeline_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<ApiResponse<PipelineStatusView>, ApiError> {
    let view = state.monitor.get_status(pipeline_id(&id)?).await?;
    Ok(ApiResponse::ok(view, "Pipeline status retrieved"))
}

pub async fn update_pipeline_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    caller: Caller,
    ApiJson(request): ApiJson<UpdateStatusRequest>,
) -> Result<ApiResponse<StatusUpdate>, ApiError> {
    let id = pipeline_id(&id)?;
    let status: PipelineStatus = request.status.parse()?;
    let mut metadata = request.metadata.unwrap_or_default();
    metadata.actor = caller.actor(metadata.actor);
    let span = pipeline_span(
        "pipeline.update_status",
        &id.to_string(),
        metadata.actor.as_deref(),
    );

    let update = state
        .monitor
        .update_status(id, status, metadata)
        .instrument(span)
        .await?;

    Ok(ApiResponse::ok(update, "Pipeline status updated"))
}

pub async fn cancel_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    caller: Caller,
    body: Bytes,
) -> Result<ApiResponse<StatusUpdate>, ApiError> {
    let id = pipeline_id(&id)?;
    let request: CancelRequest = optional_body(&body)?;
    let actor = caller.actor(None);
    let span = pipeline_span("pipeline.cancel", &id.to_string(), actor.as_deref());

    let update = state
        .monitor
        .cancel(id, request.reason, actor)
        .instrument(span)
        .await?;

    Ok(ApiResponse::ok(update, "Pipeline cancelled"))
}

pub async fn restart_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    caller: Caller,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id = pipeline_id(&id)?;
    let request: RestartRequest = optional_body(&body)?;
    let from_stage = request.from_stage.map(StageId::new);
    let actor = caller.actor(None);
    let span = pipeline_span("pipeline.restart", &id.to_string(), actor.as_deref());

    let pipeline = state
        .monitor
        .restart(id, from_stage, actor)
        .instrument(span)
        .await?;

    Ok(ApiResponse::ok(PipelineCreated::from(pipeline), "Pipeline restarted")
        .with_status(StatusCode::CREATED))
}

pub async fn list_active_pipelines(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<Vec<Pipeline>>, ApiError> {
    let pipelines = state.monitor.active().await?;
    let message = format!("{} active pipelines", pipelines.len());
    Ok(ApiResponse::ok(pipelines, message))
}

pub async fn pipeline_summary(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<PipelineSummary>, ApiError> {
    let summary = state.monitor.summary().await?;
    Ok(ApiResponse::ok(summary, "Pipeline summary retrieved"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_body() {
        let empty: CancelRequest = optional_body(&Bytes::new()).unwrap();
        assert!(empty.reason.is_none());

        let parsed: RestartRequest =
            optional_body(&Bytes::from_static(br#"{"fromStage": "build"}"#)).unwrap();
        assert_eq!(parsed.from_stage.as_deref(), Some("build"));

        let err = optional_body::<CancelRequest>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
