//! Events published by the monitor and the topics they fan out on.

use crate::ids::{PipelineId, StageId};
use crate::logs::LogEntry;
use crate::pipeline::{Pipeline, PipelineStatus, PipelineType, StatusChange};
use crate::stage::Stage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// All events in the pipeline monitor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PipelineRegistered(PipelineRegisteredPayload),
    PipelineStatusChanged(PipelineStatusChangedPayload),
    StageUpdated(StageUpdatedPayload),
    LogsAppended(LogsAppendedPayload),
    PipelineRestarted(PipelineRestartedPayload),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::PipelineRegistered(_) => "pipeline_registered",
            Event::PipelineStatusChanged(_) => "pipeline_status_changed",
            Event::StageUpdated(_) => "stage_updated",
            Event::LogsAppended(_) => "logs_appended",
            Event::PipelineRestarted(_) => "pipeline_restarted",
        }
    }

    pub fn pipeline_id(&self) -> PipelineId {
        match self {
            Event::PipelineRegistered(p) => p.pipeline_id,
            Event::PipelineStatusChanged(p) => p.pipeline_id,
            Event::StageUpdated(p) => p.pipeline_id,
            Event::LogsAppended(p) => p.pipeline_id,
            Event::PipelineRestarted(p) => p.pipeline_id,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            Event::PipelineRegistered(p) => &p.project_id,
            Event::PipelineStatusChanged(p) => &p.project_id,
            Event::StageUpdated(p) => &p.project_id,
            Event::LogsAppended(p) => &p.project_id,
            Event::PipelineRestarted(p) => &p.project_id,
        }
    }

    /// Whether a subscriber of `topic` should receive this event.
    pub fn matches(&self, topic: &Topic) -> bool {
        match topic {
            Topic::Global => true,
            Topic::Pipeline(id) => *id == self.pipeline_id(),
            Topic::Project(project) => project == self.project_id(),
        }
    }

    pub fn registered(pipeline: &Pipeline) -> Self {
        Event::PipelineRegistered(PipelineRegisteredPayload {
            pipeline_id: pipeline.id,
            project_id: pipeline.project_id.clone(),
            pipeline_type: pipeline.pipeline_type,
            environment: pipeline.environment.clone(),
            branch: pipeline.branch.clone(),
            stages: pipeline.stages.iter().map(|s| s.id.clone()).collect(),
            queued_at: pipeline.queued_at,
        })
    }

    pub fn status_changed(pipeline: &Pipeline, change: &StatusChange) -> Self {
        Event::PipelineStatusChanged(PipelineStatusChangedPayload {
            pipeline_id: pipeline.id,
            project_id: pipeline.project_id.clone(),
            previous_status: change.from,
            status: change.to,
            reason: change.reason.clone(),
            actor: change.actor.clone(),
            changed_at: change.at,
        })
    }

    pub fn stage_updated(pipeline: &Pipeline, stage: &Stage) -> Self {
        Event::StageUpdated(StageUpdatedPayload {
            pipeline_id: pipeline.id,
            project_id: pipeline.project_id.clone(),
            stage: stage.clone(),
            pipeline_status: pipeline.status,
            updated_at: pipeline.updated_at,
        })
    }

    pub fn logs_appended(pipeline: &Pipeline, stage_id: &StageId, entries: Vec<LogEntry>) -> Self {
        Event::LogsAppended(LogsAppendedPayload {
            pipeline_id: pipeline.id,
            project_id: pipeline.project_id.clone(),
            stage_id: stage_id.clone(),
            entries,
        })
    }

    pub fn restarted(source: &Pipeline, restarted: &Pipeline) -> Self {
        Event::PipelineRestarted(PipelineRestartedPayload {
            pipeline_id: restarted.id,
            project_id: restarted.project_id.clone(),
            restarted_from: source.id,
            from_stage: restarted.restart_from_stage.clone(),
            restarted_at: restarted.queued_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRegisteredPayload {
    pub pipeline_id: PipelineId,
    pub project_id: String,
    pub pipeline_type: PipelineType,
    pub environment: String,
    pub branch: String,
    pub stages: Vec<StageId>,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusChangedPayload {
    pub pipeline_id: PipelineId,
    pub project_id: String,
    pub previous_status: Option<PipelineStatus>,
    pub status: PipelineStatus,
    pub reason: Option<String>,
    pub actor: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageUpdatedPayload {
    pub pipeline_id: PipelineId,
    pub project_id: String,
    pub stage: Stage,
    pub pipeline_status: PipelineStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogsAppendedPayload {
    pub pipeline_id: PipelineId,
    pub project_id: String,
    pub stage_id: StageId,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRestartedPayload {
    pub pipeline_id: PipelineId,
    pub project_id: String,
    pub restarted_from: PipelineId,
    pub from_stage: Option<StageId>,
    pub restarted_at: DateTime<Utc>,
}

/// Subscription scope: `global`, `pipeline:<id>` or `project:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Global,
    Pipeline(PipelineId),
    Project(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Global => f.write_str("global"),
            Topic::Pipeline(id) => write!(f, "pipeline:{}", id),
            Topic::Project(project) => write!(f, "project:{}", project),
        }
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "global" {
            return Ok(Topic::Global);
        }
        match s.split_once(':') {
            Some(("pipeline", id)) => id
                .parse()
                .map(Topic::Pipeline)
                .map_err(|_| Error::Validation(format!("invalid pipeline id in topic '{}'", s))),
            Some(("project", project)) if !project.is_empty() => {
                Ok(Topic::Project(project.to_string()))
            }
            _ => Err(Error::Validation(format!(
                "invalid topic '{}', expected global, pipeline:<id> or project:<id>",
                s
            ))),
        }
    }
}
