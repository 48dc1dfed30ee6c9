//! The pipeline monitor service.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use timbel_core::events::Event;
use timbel_core::ids::{PipelineId, StageId};
use timbel_core::logs::{LogEntry, LogInput};
use timbel_core::pipeline::{
    Pipeline, PipelineStatus, Progress, RegisterPipeline, StatusMetadata,
};
use timbel_core::ports::{EventBus, PipelineStore};
use timbel_core::query::{HistoryFilter, LogQuery, Page, PipelineMetrics, PipelineSummary};
use timbel_core::stage::{Stage, StageStatus};
use timbel_core::{Error, Result};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::health::HealthCheck;
use crate::metrics::BusMetrics;

/// Result of a pipeline status transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub pipeline_id: PipelineId,
    pub previous_status: PipelineStatus,
    pub current_status: PipelineStatus,
    pub updated_at: DateTime<Utc>,
}

/// Result of a stage transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageUpdate {
    pub pipeline_id: PipelineId,
    pub stage: Stage,
    pub previous_status: StageStatus,
    pub pipeline_status: PipelineStatus,
}

/// Result of a log batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsAccepted {
    pub pipeline_id: PipelineId,
    pub stage_id: StageId,
    pub logs_count: usize,
    pub last_sequence: Option<u64>,
}

/// A pipeline together with its stage progress.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusView {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub progress: Progress,
}

/// Tracks pipeline executions: validates every transition, persists it and
/// publishes the resulting event.
///
/// Mutations of one pipeline are serialized within the process; the store's
/// version check catches writers in other processes.
pub struct PipelineMonitor {
    store: Arc<dyn PipelineStore>,
    bus: Arc<dyn EventBus>,
    config: MonitorConfig,
    bus_metrics: Option<Arc<BusMetrics>>,
    locks: Mutex<HashMap<PipelineId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PipelineMonitor {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        bus: Arc<dyn EventBus>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            bus,
            config,
            bus_metrics: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Report these bus metrics from [`PipelineMonitor::health`].
    pub fn with_bus_metrics(mut self, metrics: Arc<BusMetrics>) -> Self {
        self.bus_metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    // === Registration & transitions ===

    /// Validate and register a new pipeline in `queued` status.
    pub async fn register(&self, request: RegisterPipeline) -> Result<Pipeline> {
        let spec = request.validate()?;
        let pipeline = Pipeline::new(spec, Utc::now());
        self.store.insert(&pipeline).await?;

        info!(
            pipeline_id = %pipeline.id,
            project_id = %pipeline.project_id,
            pipeline_type = %pipeline.pipeline_type,
            environment = %pipeline.environment,
            stages = pipeline.stages.len(),
            "Pipeline registered"
        );

        self.publish(Event::registered(&pipeline)).await;
        Ok(pipeline)
    }

    /// Move a pipeline to `status`, recording the reason and actor.
    pub async fn update_status(
        &self,
        id: PipelineId,
        status: PipelineStatus,
        metadata: StatusMetadata,
    ) -> Result<StatusUpdate> {
        let (pipeline, change) = self
            .mutate(id, |pipeline, now| pipeline.transition(status, metadata, now))
            .await
            .inspect_err(|e| warn!(pipeline_id = %id, to = %status, error = %e, "Status update rejected"))?;

        info!(
            pipeline_id = %id,
            from = ?change.from,
            to = %change.to,
            actor = change.actor.as_deref().unwrap_or(""),
            "Pipeline status changed"
        );

        self.publish(Event::status_changed(&pipeline, &change)).await;

        Ok(StatusUpdate {
            pipeline_id: id,
            previous_status: change.from.unwrap_or(change.to),
            current_status: change.to,
            updated_at: pipeline.updated_at,
        })
    }

    /// Apply a stage transition and merge `data` into the stage.
    pub async fn advance_stage(
        &self,
        id: PipelineId,
        stage_id: &StageId,
        status: StageStatus,
        data: Map<String, Value>,
    ) -> Result<StageUpdate> {
        let (pipeline, advance) = self
            .mutate(id, |pipeline, now| {
                pipeline.advance_stage(stage_id, status, data, now)
            })
            .await
            .inspect_err(|e| {
                warn!(pipeline_id = %id, stage_id = %stage_id, to = %status, error = %e, "Stage update rejected")
            })?;

        info!(
            pipeline_id = %id,
            stage_id = %stage_id,
            from = %advance.previous,
            to = %advance.stage.status,
            duration_ms = advance.stage.duration_ms,
            "Stage advanced"
        );

        if let Some(change) = &advance.pipeline_started {
            self.publish(Event::status_changed(&pipeline, change)).await;
        }
        self.publish(Event::stage_updated(&pipeline, &advance.stage))
            .await;

        Ok(StageUpdate {
            pipeline_id: id,
            stage: advance.stage,
            previous_status: advance.previous,
            pipeline_status: pipeline.status,
        })
    }

    /// Cancel a pipeline. Finished stages are left as they are.
    pub async fn cancel(
        &self,
        id: PipelineId,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<StatusUpdate> {
        let reason = reason.or_else(|| Some("cancelled by user".to_string()));
        self.update_status(
            id,
            PipelineStatus::Cancelled,
            StatusMetadata::new(reason, actor),
        )
        .await
    }

    /// Register a new pipeline seeded from `id`. The source is not modified.
    pub async fn restart(
        &self,
        id: PipelineId,
        from_stage: Option<StageId>,
        actor: Option<String>,
    ) -> Result<Pipeline> {
        let source = self.require(id).await?;
        let pipeline = source.restarted(from_stage.as_ref(), actor, Utc::now())?;
        self.store.insert(&pipeline).await?;

        info!(
            pipeline_id = %pipeline.id,
            restarted_from = %source.id,
            from_stage = pipeline.restart_from_stage.as_ref().map(|s| s.as_str()).unwrap_or(""),
            "Pipeline restarted"
        );

        self.publish(Event::restarted(&source, &pipeline)).await;
        self.publish(Event::registered(&pipeline)).await;
        Ok(pipeline)
    }

    // === Logs ===

    /// Append a batch of log lines to one stage, in arrival order.
    pub async fn stream_logs(
        &self,
        id: PipelineId,
        stage_id: &StageId,
        logs: Vec<LogInput>,
    ) -> Result<LogsAccepted> {
        if logs.is_empty() {
            return Err(Error::Validation("logs must not be empty".to_string()));
        }

        let pipeline = self.require(id).await?;
        pipeline.require_stage(stage_id)?;

        let now = Utc::now();
        let entries: Vec<LogEntry> = logs
            .into_iter()
            .map(|input| input.into_entry(id, stage_id.clone(), now))
            .collect();
        let entries = self.store.append_logs(entries).await?;
        let logs_count = entries.len();
        let last_sequence = entries.last().map(|e| e.sequence);

        debug!(pipeline_id = %id, stage_id = %stage_id, logs_count, "Logs appended");
        self.publish(Event::logs_appended(&pipeline, stage_id, entries))
            .await;

        Ok(LogsAccepted {
            pipeline_id: id,
            stage_id: stage_id.clone(),
            logs_count,
            last_sequence,
        })
    }

    /// Read back retained logs.
    pub async fn logs(
        &self,
        id: PipelineId,
        stage_id: Option<StageId>,
        after_sequence: Option<u64>,
        limit: Option<u32>,
    ) -> Result<Vec<LogEntry>> {
        let pipeline = self.require(id).await?;
        if let Some(stage_id) = &stage_id {
            pipeline.require_stage(stage_id)?;
        }

        let max = self.config.log_read_limit.max(1);
        let limit = limit.unwrap_or(max).clamp(1, max);

        self.store
            .logs(&LogQuery {
                pipeline_id: id,
                stage_id,
                after_sequence,
                limit,
            })
            .await
    }

    // === Queries ===

    pub async fn get_status(&self, id: PipelineId) -> Result<PipelineStatusView> {
        let pipeline = self.require(id).await?;
        let progress = pipeline.progress();
        Ok(PipelineStatusView { pipeline, progress })
    }

    pub async fn active(&self) -> Result<Vec<Pipeline>> {
        self.store.list_active().await
    }

    pub async fn summary(&self) -> Result<PipelineSummary> {
        self.store.summary().await
    }

    pub async fn metrics(&self, window_hours: Option<u32>) -> Result<PipelineMetrics> {
        let window_hours = window_hours
            .filter(|h| *h > 0)
            .unwrap_or(self.config.metrics_window_hours);
        let max = self.config.metrics_max_window_hours;
        if window_hours > max {
            return Err(Error::Validation(format!(
                "windowHours must not exceed {}",
                max
            )));
        }
        let since = Duration::try_hours(i64::from(window_hours))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| Error::Validation(format!("windowHours out of range: {}", window_hours)))?;
        let pipelines = self.store.queued_since(since).await?;
        Ok(PipelineMetrics::compute(&pipelines, window_hours))
    }

    pub async fn history(&self, filter: HistoryFilter) -> Result<Page<Pipeline>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(Error::Validation(
                    "'from' must not be after 'to'".to_string(),
                ));
            }
        }
        let filter = filter.with_limits(
            self.config.history_default_limit,
            self.config.history_max_limit,
        );
        self.store.history(&filter).await
    }

    pub async fn health(&self) -> HealthCheck {
        let store = self.store.ping().await;
        let bus = self.bus_metrics.as_ref().map(|m| m.snapshot());
        HealthCheck::evaluate(&store, bus)
    }

    // === Internals ===

    async fn require(&self, id: PipelineId) -> Result<Pipeline> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::PipelineNotFound(id.to_string()))
    }

    /// Read-modify-write one pipeline under its lock.
    ///
    /// The lock entry is dropped once the pipeline is unknown or terminal,
    /// since neither accepts another transition.
    async fn mutate<T>(
        &self,
        id: PipelineId,
        apply: impl FnOnce(&mut Pipeline, DateTime<Utc>) -> Result<T>,
    ) -> Result<(Pipeline, T)> {
        let _guard = self.lock(id).await;

        let result = self.apply_locked(id, apply).await;
        let settled = match &result {
            Ok((pipeline, _)) => pipeline.status.is_terminal(),
            Err(Error::PipelineNotFound(_) | Error::PipelineTerminal { .. }) => true,
            Err(_) => false,
        };
        if settled {
            self.release(id);
        }
        result
    }

    async fn apply_locked<T>(
        &self,
        id: PipelineId,
        apply: impl FnOnce(&mut Pipeline, DateTime<Utc>) -> Result<T>,
    ) -> Result<(Pipeline, T)> {
        let mut pipeline = self.require(id).await?;
        let outcome = apply(&mut pipeline, Utc::now())?;
        pipeline.version = self.store.update(&pipeline).await?;
        Ok((pipeline, outcome))
    }

    async fn lock(&self, id: PipelineId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock of a pipeline that accepts no more transitions.
    fn release(&self, id: PipelineId) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(&id);
    }

    async fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.bus.publish(event).await {
            warn!(event = name, error = %e, "Failed to publish event");
        }
    }
}
