//! Span creation for monitor operations.
//!
//! Field names follow the OpenTelemetry CI/CD semantic conventions where one
//! exists; `otel.name` carries the operation so exported spans are named after
//! what they did rather than the constructor.

use tracing::{Span, info_span};

/// Span for an operation on one pipeline, attributed to `actor` when known.
pub fn pipeline_span(operation: &'static str, pipeline_id: &str, actor: Option<&str>) -> Span {
    info_span!(
        "pipeline",
        otel.name = operation,
        cicd.pipeline.run.id = pipeline_id,
        cicd.pipeline.actor = actor,
    )
}

/// Span for a stage transition or log batch.
pub fn stage_span(operation: &'static str, pipeline_id: &str, stage_id: &str) -> Span {
    info_span!(
        "stage",
        otel.name = operation,
        cicd.pipeline.run.id = pipeline_id,
        cicd.pipeline.task.name = stage_id,
    )
}

/// Span covering one WebSocket subscriber's lifetime.
pub fn subscription_span(client_id: &str) -> Span {
    info_span!(
        "subscription",
        otel.name = "ws.subscribe",
        client.id = client_id,
        topics = tracing::field::Empty,
    )
}
