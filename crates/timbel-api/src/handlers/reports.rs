//! Metrics and history reports.

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use timbel_core::pipeline::{Pipeline, PipelineStatus, PipelineType};
use timbel_core::query::{HistoryFilter, Page, PipelineMetrics};

use crate::error::ApiError;
use crate::extract::ApiQuery;
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsParams {
    pub window_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub status: Option<String>,
    pub environment: Option<String>,
    pub project_id: Option<String>,
    #[serde(rename = "type")]
    pub pipeline_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl HistoryParams {
    fn into_filter(self) -> Result<HistoryFilter, ApiError> {
        Ok(HistoryFilter {
            status: self
                .status
                .map(|s| s.parse::<PipelineStatus>())
                .transpose()?,
            environment: self.environment,
            project_id: self.project_id,
            pipeline_type: self
                .pipeline_type
                .map(|t| t.parse::<PipelineType>())
                .transpose()?,
            from: self.from,
            to: self.to,
            limit: self.limit.unwrap_or(0),
            offset: self.offset.unwrap_or(0),
        })
    }
}

pub async fn pipeline_metrics(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<MetricsParams>,
) -> Result<ApiResponse<PipelineMetrics>, ApiError> {
    let metrics = state.monitor.metrics(params.window_hours).await?;
    let message = format!("Metrics for the last {} hours", metrics.window_hours);
    Ok(ApiResponse::ok(metrics, message))
}

pub async fn pipeline_history(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<HistoryParams>,
) -> Result<ApiResponse<Page<Pipeline>>, ApiError> {
    let page = state.monitor.history(params.into_filter()?).await?;
    let message = format!("{} of {} pipelines", page.items.len(), page.total);
    Ok(ApiResponse::ok(page, message))
}
