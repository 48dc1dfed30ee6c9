//! Pipeline executions and their status machine.

use crate::ids::{PipelineId, StageId};
use crate::stage::{Stage, StageStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Actor recorded for transitions the monitor makes on its own.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl PipelineStatus {
    pub const ALL: [PipelineStatus; 6] = [
        PipelineStatus::Queued,
        PipelineStatus::Running,
        PipelineStatus::Completed,
        PipelineStatus::Failed,
        PipelineStatus::Cancelled,
        PipelineStatus::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Queued => "queued",
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Cancelled => "cancelled",
            PipelineStatus::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: PipelineStatus) -> bool {
        use PipelineStatus::*;
        matches!(
            (self, next),
            (Queued, Running | Paused | Cancelled | Failed)
                | (Running, Completed | Failed | Cancelled | Paused)
                | (Paused, Running | Cancelled | Failed)
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PipelineStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "invalid pipeline status '{}', expected one of: queued, running, completed, failed, cancelled, paused",
                    s
                ))
            })
    }
}

/// Kind of pipeline; selects the default stage list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineType {
    Build,
    Test,
    Deploy,
    FullCicd,
    Custom,
}

impl PipelineType {
    pub const ALL: [PipelineType; 5] = [
        PipelineType::Build,
        PipelineType::Test,
        PipelineType::Deploy,
        PipelineType::FullCicd,
        PipelineType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineType::Build => "build",
            PipelineType::Test => "test",
            PipelineType::Deploy => "deploy",
            PipelineType::FullCicd => "full_cicd",
            PipelineType::Custom => "custom",
        }
    }

    /// Default stage names. Empty for `Custom`.
    pub fn stage_template(&self) -> &'static [&'static str] {
        match self {
            PipelineType::Build => &["checkout", "build", "unit-test", "package"],
            PipelineType::Test => &["checkout", "unit-test", "integration-test", "report"],
            PipelineType::Deploy => &["prepare", "deploy", "verify"],
            PipelineType::FullCicd => &[
                "checkout",
                "build",
                "test",
                "security-scan",
                "package",
                "deploy",
                "verify",
            ],
            PipelineType::Custom => &[],
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PipelineType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "invalid pipeline type '{}', expected one of: build, test, deploy, full_cicd, custom",
                    s
                ))
            })
    }
}

/// Registration payload as received from callers. Every field is optional
/// here so that missing ones are reported together by [`RegisterPipeline::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPipeline {
    #[serde(rename = "type")]
    pub pipeline_type: Option<String>,
    pub project_id: Option<String>,
    pub repository_url: Option<String>,
    pub branch: Option<String>,
    pub environment: Option<String>,
    pub commit_sha: Option<String>,
    pub triggered_by: Option<String>,
    /// Explicit stage names, overriding the type's template.
    pub stages: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
}

/// Validated registration data.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    pub pipeline_type: PipelineType,
    pub project_id: String,
    pub repository_url: String,
    pub branch: String,
    pub environment: String,
    pub commit_sha: Option<String>,
    pub triggered_by: Option<String>,
    pub stage_names: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl RegisterPipeline {
    pub fn validate(self) -> Result<PipelineSpec> {
        fn required(value: Option<String>, field: &'static str, missing: &mut Vec<&'static str>) -> String {
            match value.map(|v| v.trim().to_string()) {
                Some(v) if !v.is_empty() => v,
                _ => {
                    missing.push(field);
                    String::new()
                }
            }
        }

        let mut missing = Vec::new();
        let pipeline_type = required(self.pipeline_type, "type", &mut missing);
        let project_id = required(self.project_id, "projectId", &mut missing);
        let repository_url = required(self.repository_url, "repositoryUrl", &mut missing);
        let branch = required(self.branch, "branch", &mut missing);
        let environment = required(self.environment, "environment", &mut missing);

        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let pipeline_type: PipelineType = pipeline_type.parse()?;

        let stage_names = match self.stages {
            Some(names) => names,
            None => pipeline_type
                .stage_template()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        validate_stage_names(&stage_names)?;

        Ok(PipelineSpec {
            pipeline_type,
            project_id,
            repository_url,
            branch,
            environment,
            commit_sha: self.commit_sha.filter(|s| !s.trim().is_empty()),
            triggered_by: self.triggered_by,
            stage_names,
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

fn validate_stage_names(names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(Error::Validation(
            "a pipeline needs at least one stage".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for name in names {
        let id = StageId::from_name(name);
        if id.as_str().is_empty() {
            return Err(Error::Validation(format!("invalid stage name '{}'", name)));
        }
        if !seen.insert(id.clone()) {
            return Err(Error::Validation(format!("duplicate stage '{}'", id)));
        }
    }
    Ok(())
}

/// Reason/actor attached to a status transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusMetadata {
    pub reason: Option<String>,
    pub actor: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl StatusMetadata {
    pub fn new(reason: Option<String>, actor: Option<String>) -> Self {
        Self {
            reason,
            actor,
            details: Map::new(),
        }
    }

    fn system(reason: impl Into<String>) -> Self {
        Self::new(Some(reason.into()), Some(SYSTEM_ACTOR.to_string()))
    }
}

/// One entry of a pipeline's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub from: Option<PipelineStatus>,
    pub to: PipelineStatus,
    pub reason: Option<String>,
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    pub at: DateTime<Utc>,
}

/// One CI/CD execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: PipelineId,
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    pub project_id: String,
    pub repository_url: String,
    pub branch: String,
    pub environment: String,
    pub status: PipelineStatus,
    pub stages: Vec<Stage>,
    pub commit_sha: Option<String>,
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub restarted_from: Option<PipelineId>,
    pub restart_from_stage: Option<StageId>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped by the store on every persisted mutation.
    #[serde(default)]
    pub version: u64,
}

/// Outcome of [`Pipeline::advance_stage`].
#[derive(Debug, Clone)]
pub struct StageAdvance {
    pub stage: Stage,
    pub previous: StageStatus,
    /// Set when the stage update implicitly started the pipeline.
    pub pipeline_started: Option<StatusChange>,
}

/// Stage completion summary for a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub completed_stages: u32,
    pub total_stages: u32,
    pub percent: u8,
    pub current_stage: Option<StageId>,
}

impl Pipeline {
    pub fn new(spec: PipelineSpec, now: DateTime<Utc>) -> Self {
        let stages = spec
            .stage_names
            .iter()
            .enumerate()
            .map(|(order, name)| Stage::new(name.clone(), order as u32))
            .collect();

        Self {
            id: PipelineId::new(),
            pipeline_type: spec.pipeline_type,
            project_id: spec.project_id,
            repository_url: spec.repository_url,
            branch: spec.branch,
            environment: spec.environment,
            status: PipelineStatus::Queued,
            stages,
            commit_sha: spec.commit_sha,
            triggered_by: spec.triggered_by.clone(),
            metadata: spec.metadata,
            restarted_from: None,
            restart_from_stage: None,
            status_history: vec![StatusChange {
                from: None,
                to: PipelineStatus::Queued,
                reason: Some("registered".to_string()),
                actor: spec.triggered_by,
                details: Map::new(),
                at: now,
            }],
            queued_at: now,
            started_at: None,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    pub fn stage(&self, stage_id: &StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| &s.id == stage_id)
    }

    pub fn require_stage(&self, stage_id: &StageId) -> Result<&Stage> {
        self.stage(stage_id).ok_or_else(|| Error::StageNotFound {
            pipeline: self.id.to_string(),
            stage: stage_id.to_string(),
        })
    }

    fn ensure_not_terminal(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::PipelineTerminal {
                id: self.id.to_string(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    /// Apply a pipeline status transition. Returns the recorded change.
    pub fn transition(
        &mut self,
        next: PipelineStatus,
        metadata: StatusMetadata,
        now: DateTime<Utc>,
    ) -> Result<StatusChange> {
        self.ensure_not_terminal()?;

        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                entity: "pipeline",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        if next == PipelineStatus::Completed {
            let unfinished: Vec<String> = self
                .stages
                .iter()
                .filter(|s| !s.status.is_done())
                .map(|s| s.id.to_string())
                .collect();
            if !unfinished.is_empty() {
                return Err(Error::StagesIncomplete {
                    id: self.id.to_string(),
                    stages: unfinished,
                });
            }
        }

        let change = StatusChange {
            from: Some(self.status),
            to: next,
            reason: metadata.reason,
            actor: metadata.actor,
            details: metadata.details,
            at: now,
        };

        self.status = next;
        if next == PipelineStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
            // Stages cut off mid-run are closed; finished ones stay as they were.
            for stage in self.stages.iter_mut() {
                if stage.status == StageStatus::Running {
                    stage.apply(StageStatus::Failed, now)?;
                }
            }
        }
        self.updated_at = now;
        self.status_history.push(change.clone());

        Ok(change)
    }

    /// Apply a stage status transition and merge its data.
    pub fn advance_stage(
        &mut self,
        stage_id: &StageId,
        next: StageStatus,
        data: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<StageAdvance> {
        self.ensure_not_terminal()?;

        let index = self
            .stages
            .iter()
            .position(|s| &s.id == stage_id)
            .ok_or_else(|| Error::StageNotFound {
                pipeline: self.id.to_string(),
                stage: stage_id.to_string(),
            })?;

        if self.status == PipelineStatus::Paused {
            return Err(Error::PipelinePaused(self.id.to_string()));
        }

        let stage = &mut self.stages[index];
        let previous = stage.apply(next, now)?;
        stage.merge_data(data);
        let stage = stage.clone();

        let pipeline_started = if self.status == PipelineStatus::Queued && next != StageStatus::Skipped
        {
            Some(self.transition(
                PipelineStatus::Running,
                StatusMetadata::system(format!("stage {} reported {}", stage_id, next)),
                now,
            )?)
        } else {
            None
        };

        self.updated_at = now;

        Ok(StageAdvance {
            stage,
            previous,
            pipeline_started,
        })
    }

    /// Build a fresh pipeline from this one's configuration. Stages ordered
    /// before `from_stage` are carried over as skipped. `self` is not modified.
    pub fn restarted(
        &self,
        from_stage: Option<&StageId>,
        actor: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Pipeline> {
        let resume_at = match from_stage {
            Some(stage_id) => Some(self.require_stage(stage_id)?.order),
            None => None,
        };

        let spec = PipelineSpec {
            pipeline_type: self.pipeline_type,
            project_id: self.project_id.clone(),
            repository_url: self.repository_url.clone(),
            branch: self.branch.clone(),
            environment: self.environment.clone(),
            commit_sha: self.commit_sha.clone(),
            triggered_by: actor,
            stage_names: self.stages.iter().map(|s| s.name.clone()).collect(),
            metadata: self.metadata.clone(),
        };

        let mut pipeline = Pipeline::new(spec, now);
        pipeline.restarted_from = Some(self.id);
        pipeline.restart_from_stage = from_stage.cloned();
        if let Some(last) = pipeline.status_history.last_mut() {
            last.reason = Some(format!("restarted from {}", self.id));
        }

        if let Some(resume_at) = resume_at {
            for stage in pipeline.stages.iter_mut().filter(|s| s.order < resume_at) {
                stage.status = StageStatus::Skipped;
                stage
                    .data
                    .insert("reused_from".to_string(), Value::from(self.id.to_string()));
            }
        }

        Ok(pipeline)
    }

    pub fn progress(&self) -> Progress {
        let total = self.stages.len() as u32;
        let completed = self.stages.iter().filter(|s| s.status.is_done()).count() as u32;
        let percent = if total == 0 {
            0
        } else {
            (completed * 100 / total) as u8
        };

        let current_stage = self
            .stages
            .iter()
            .find(|s| s.status == StageStatus::Running)
            .or_else(|| {
                if self.status.is_terminal() {
                    None
                } else {
                    self.stages.iter().find(|s| s.status == StageStatus::Pending)
                }
            })
            .map(|s| s.id.clone());

        Progress {
            completed_stages: completed,
            total_stages: total,
            percent,
            current_stage,
        }
    }

    /// Wall-clock duration of a finished pipeline.
    pub fn duration_ms(&self) -> Option<u64> {
        let start = self.started_at.unwrap_or(self.queued_at);
        self.completed_at
            .map(|end| (end - start).num_milliseconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn registration() -> RegisterPipeline {
        RegisterPipeline {
            pipeline_type: Some("build".into()),
            project_id: Some("proj-ecommerce".into()),
            repository_url: Some("https://git.example.com/shop.git".into()),
            branch: Some("main".into()),
            environment: Some("staging".into()),
            ..Default::default()
        }
    }

    fn three_stage_pipeline() -> Pipeline {
        let spec = RegisterPipeline {
            stages: Some(vec!["build".into(), "test".into(), "deploy".into()]),
            ..registration()
        }
        .validate()
        .unwrap();
        Pipeline::new(spec, Utc::now())
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        use PipelineStatus::*;
        let allowed = [
            (Queued, Running),
            (Queued, Paused),
            (Queued, Cancelled),
            (Queued, Failed),
            (Running, Completed),
            (Running, Failed),
            (Running, Cancelled),
            (Running, Paused),
            (Paused, Running),
            (Paused, Cancelled),
            (Paused, Failed),
        ];
        for from in PipelineStatus::ALL {
            for to in PipelineStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
            if from.is_terminal() {
                assert!(PipelineStatus::ALL.iter().all(|to| !from.can_transition_to(*to)));
            }
        }
    }

    #[test]
    fn test_parse_enums() {
        for status in PipelineStatus::ALL {
            assert_eq!(status.as_str().parse::<PipelineStatus>().unwrap(), status);
        }
        for kind in PipelineType::ALL {
            assert_eq!(kind.as_str().parse::<PipelineType>().unwrap(), kind);
        }
        assert!("done".parse::<PipelineStatus>().is_err());
        assert!("nightly".parse::<PipelineType>().is_err());
    }

    #[test]
    fn test_register_uses_template() {
        let pipeline = Pipeline::new(registration().validate().unwrap(), Utc::now());
        let ids: Vec<&str> = pipeline.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["checkout", "build", "unit-test", "package"]);
        assert_eq!(pipeline.status, PipelineStatus::Queued);
        assert!(pipeline.stages.iter().enumerate().all(|(i, s)| s.order == i as u32));
        assert_eq!(pipeline.status_history.len(), 1);
    }

    #[test]
    fn test_register_reports_all_missing_fields() {
        let err = RegisterPipeline {
            pipeline_type: Some("deploy".into()),
            branch: Some("  ".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();

        let Error::Validation(message) = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("projectId"));
        assert!(message.contains("repositoryUrl"));
        assert!(message.contains("branch"));
        assert!(message.contains("environment"));
        assert!(!message.contains("type"));
    }

    #[test]
    fn test_custom_type_requires_stages() {
        let err = RegisterPipeline {
            pipeline_type: Some("custom".into()),
            ..registration()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = RegisterPipeline {
            stages: Some(vec!["Build".into(), "build".into()]),
            ..registration()
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, Error::Validation(m) if m.contains("duplicate")));
    }

    #[test]
    fn test_terminal_sets_completed_at_and_blocks_stages() {
        let mut pipeline = three_stage_pipeline();
        let now = Utc::now();

        pipeline
            .transition(PipelineStatus::Cancelled, StatusMetadata::default(), now)
            .unwrap();
        assert_eq!(pipeline.completed_at, Some(now));

        let err = pipeline
            .advance_stage(&StageId::new("build"), StageStatus::Running, Map::new(), now)
            .unwrap_err();
        assert!(matches!(err, Error::PipelineTerminal { .. }));

        let err = pipeline
            .transition(PipelineStatus::Running, StatusMetadata::default(), now)
            .unwrap_err();
        assert!(matches!(err, Error::PipelineTerminal { .. }));
    }

    #[test]
    fn test_stage_failure_scenario() {
        let mut pipeline = three_stage_pipeline();
        let t0 = Utc::now();

        let started = pipeline
            .advance_stage(&StageId::new("build"), StageStatus::Running, Map::new(), t0)
            .unwrap();
        assert!(started.pipeline_started.is_some());
        assert_eq!(pipeline.status, PipelineStatus::Running);

        pipeline
            .advance_stage(
                &StageId::new("build"),
                StageStatus::Completed,
                Map::new(),
                t0 + Duration::seconds(5),
            )
            .unwrap();
        pipeline
            .advance_stage(
                &StageId::new("test"),
                StageStatus::Failed,
                Map::new(),
                t0 + Duration::seconds(9),
            )
            .unwrap();

        let change = pipeline
            .transition(
                PipelineStatus::Failed,
                StatusMetadata::new(Some("tests failed".into()), Some("ci-agent".into())),
                t0 + Duration::seconds(10),
            )
            .unwrap();
        assert_eq!(change.from, Some(PipelineStatus::Running));
        assert!(pipeline.completed_at.is_some());

        let err = pipeline
            .advance_stage(
                &StageId::new("deploy"),
                StageStatus::Running,
                Map::new(),
                t0 + Duration::seconds(11),
            )
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(pipeline.stages[2].status, StageStatus::Pending);
    }

    #[test]
    fn test_cancel_keeps_completed_stages() {
        let mut pipeline = three_stage_pipeline();
        let now = Utc::now();
        let build = StageId::new("build");
        let test = StageId::new("test");

        pipeline
            .advance_stage(&build, StageStatus::Completed, Map::new(), now)
            .unwrap();
        pipeline
            .advance_stage(&test, StageStatus::Running, Map::new(), now)
            .unwrap();
        let completed_build = pipeline.stage(&build).unwrap().clone();

        pipeline
            .transition(
                PipelineStatus::Cancelled,
                StatusMetadata::new(Some("superseded".into()), Some("alice".into())),
                now + Duration::seconds(3),
            )
            .unwrap();

        assert_eq!(pipeline.stage(&build).unwrap(), &completed_build);
        assert_eq!(pipeline.stage(&test).unwrap().status, StageStatus::Failed);
        assert_eq!(pipeline.stage(&test).unwrap().duration_ms, Some(3000));

        let last = pipeline.status_history.last().unwrap();
        assert_eq!(last.reason.as_deref(), Some("superseded"));
        assert_eq!(last.actor.as_deref(), Some("alice"));
    }

    #[test]
    fn test_completed_requires_finished_stages() {
        let mut pipeline = three_stage_pipeline();
        let now = Utc::now();
        pipeline
            .advance_stage(&StageId::new("build"), StageStatus::Running, Map::new(), now)
            .unwrap();

        let err = pipeline
            .transition(PipelineStatus::Completed, StatusMetadata::default(), now)
            .unwrap_err();
        assert!(matches!(err, Error::StagesIncomplete { ref stages, .. } if stages.len() == 3));
        assert_eq!(pipeline.status, PipelineStatus::Running);

        for id in ["build", "test"] {
            pipeline
                .advance_stage(&StageId::new(id), StageStatus::Completed, Map::new(), now)
                .unwrap();
        }
        pipeline
            .advance_stage(&StageId::new("deploy"), StageStatus::Skipped, Map::new(), now)
            .unwrap();
        pipeline
            .transition(PipelineStatus::Completed, StatusMetadata::default(), now)
            .unwrap();
        assert_eq!(pipeline.progress().percent, 100);
    }

    #[test]
    fn test_paused_pipeline_rejects_stage_updates() {
        let mut pipeline = three_stage_pipeline();
        let now = Utc::now();
        pipeline
            .transition(PipelineStatus::Paused, StatusMetadata::default(), now)
            .unwrap();
        let err = pipeline
            .advance_stage(&StageId::new("build"), StageStatus::Running, Map::new(), now)
            .unwrap_err();
        assert!(matches!(err, Error::PipelinePaused(_)));

        let err = pipeline
            .advance_stage(&StageId::new("nope"), StageStatus::Running, Map::new(), now)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_restart_is_non_destructive() {
        let mut source = three_stage_pipeline();
        let now = Utc::now();
        source
            .advance_stage(&StageId::new("build"), StageStatus::Completed, Map::new(), now)
            .unwrap();
        source
            .transition(PipelineStatus::Failed, StatusMetadata::default(), now)
            .unwrap();
        let before = source.clone();

        let restarted = source
            .restarted(Some(&StageId::new("test")), Some("bob".into()), now)
            .unwrap();

        assert_eq!(source, before);
        assert_ne!(restarted.id, source.id);
        assert_eq!(restarted.restarted_from, Some(source.id));
        assert_eq!(restarted.status, PipelineStatus::Queued);
        assert_eq!(restarted.stages[0].status, StageStatus::Skipped);
        assert_eq!(restarted.stages[1].status, StageStatus::Pending);
        assert_eq!(restarted.stages[2].status, StageStatus::Pending);
        assert_eq!(restarted.triggered_by.as_deref(), Some("bob"));

        let err = source
            .restarted(Some(&StageId::new("publish")), None, now)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_progress_tracks_current_stage() {
        let mut pipeline = three_stage_pipeline();
        let now = Utc::now();
        assert_eq!(pipeline.progress().current_stage, Some(StageId::new("build")));

        pipeline
            .advance_stage(&StageId::new("build"), StageStatus::Completed, Map::new(), now)
            .unwrap();
        pipeline
            .advance_stage(&StageId::new("test"), StageStatus::Running, Map::new(), now)
            .unwrap();

        let progress = pipeline.progress();
        assert_eq!(progress.completed_stages, 1);
        assert_eq!(progress.total_stages, 3);
        assert_eq!(progress.percent, 33);
        assert_eq!(progress.current_stage, Some(StageId::new("test")));
    }
}
