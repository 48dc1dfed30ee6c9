//! Read-side projections: history filters, pagination, summary and metrics.

use crate::ids::{PipelineId, StageId};
use crate::pipeline::{Pipeline, PipelineStatus, PipelineType};
use crate::stage::StageStatus;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filters for pipeline history. Bounds on `queued_at` are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub status: Option<PipelineStatus>,
    pub environment: Option<String>,
    pub project_id: Option<String>,
    pub pipeline_type: Option<PipelineType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl HistoryFilter {
    pub fn matches(&self, pipeline: &Pipeline) -> bool {
        self.status.is_none_or(|s| pipeline.status == s)
            && self
                .environment
                .as_deref()
                .is_none_or(|e| pipeline.environment == e)
            && self
                .project_id
                .as_deref()
                .is_none_or(|p| pipeline.project_id == p)
            && self.pipeline_type.is_none_or(|t| pipeline.pipeline_type == t)
            && self.from.is_none_or(|from| pipeline.queued_at >= from)
            && self.to.is_none_or(|to| pipeline.queued_at <= to)
    }

    /// Clamp `limit` into `1..=max`, substituting `default` for zero.
    pub fn with_limits(mut self, default: u32, max: u32) -> Self {
        self.limit = match self.limit {
            0 => default,
            n => n.min(max),
        };
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Log read-back query.
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub pipeline_id: PipelineId,
    pub stage_id: Option<StageId>,
    /// Only entries with a sequence greater than this.
    pub after_sequence: Option<u64>,
    pub limit: u32,
}

/// Dashboard counts across all pipelines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub total: u64,
    pub active: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_environment: BTreeMap<String, u64>,
}

impl PipelineSummary {
    pub fn record(&mut self, status: PipelineStatus, environment: &str, count: u64) {
        self.total += count;
        if status.is_active() {
            self.active += count;
        }
        *self.by_status.entry(status.to_string()).or_default() += count;
        *self.by_environment.entry(environment.to_string()).or_default() += count;
    }

    pub fn from_pipelines<'a>(pipelines: impl IntoIterator<Item = &'a Pipeline>) -> Self {
        let mut summary = Self::default();
        for pipeline in pipelines {
            summary.record(pipeline.status, &pipeline.environment, 1);
        }
        summary
    }
}

/// Aggregate execution metrics over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetrics {
    pub window_hours: u32,
    pub total: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Completed over finished (completed + failed + cancelled), 0.0 when nothing finished.
    pub success_rate: f64,
    pub average_duration_ms: Option<u64>,
    pub p95_duration_ms: Option<u64>,
    pub by_type: BTreeMap<String, u64>,
    /// Failed stage counts keyed by stage id.
    pub stage_failures: BTreeMap<String, u64>,
}

impl PipelineMetrics {
    pub fn compute(pipelines: &[Pipeline], window_hours: u32) -> Self {
        let mut metrics = PipelineMetrics {
            window_hours,
            total: pipelines.len() as u64,
            active: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            success_rate: 0.0,
            average_duration_ms: None,
            p95_duration_ms: None,
            by_type: BTreeMap::new(),
            stage_failures: BTreeMap::new(),
        };

        let mut durations = Vec::new();
        for pipeline in pipelines {
            match pipeline.status {
                PipelineStatus::Completed => metrics.completed += 1,
                PipelineStatus::Failed => metrics.failed += 1,
                PipelineStatus::Cancelled => metrics.cancelled += 1,
                _ => metrics.active += 1,
            }
            *metrics
                .by_type
                .entry(pipeline.pipeline_type.to_string())
                .or_default() += 1;

            for stage in pipeline
                .stages
                .iter()
                .filter(|s| s.status == StageStatus::Failed)
            {
                *metrics
                    .stage_failures
                    .entry(stage.id.to_string())
                    .or_default() += 1;
            }

            if let Some(duration) = pipeline.duration_ms() {
                durations.push(duration);
            }
        }

        let finished = metrics.completed + metrics.failed + metrics.cancelled;
        if finished > 0 {
            metrics.success_rate = metrics.completed as f64 / finished as f64;
        }

        if !durations.is_empty() {
            durations.sort_unstable();
            let sum: u64 = durations.iter().sum();
            metrics.average_duration_ms = Some(sum / durations.len() as u64);
            let rank = (durations.len() * 95).div_ceil(100);
            metrics.p95_duration_ms = Some(durations[rank.saturating_sub(1)]);
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{RegisterPipeline, StatusMetadata};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    fn pipeline(environment: &str, queued_at: DateTime<Utc>) -> Pipeline {
        let spec = RegisterPipeline {
            pipeline_type: Some("deploy".into()),
            project_id: Some("proj".into()),
            repository_url: Some("https://git.example.com/p.git".into()),
            branch: Some("main".into()),
            environment: Some(environment.into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        Pipeline::new(spec, queued_at)
    }

    fn finish(p: &mut Pipeline, status: PipelineStatus, after: Duration) {
        let start = p.queued_at;
        p.transition(PipelineStatus::Running, StatusMetadata::default(), start)
            .unwrap();
        if status == PipelineStatus::Completed {
            for id in ["prepare", "deploy", "verify"] {
                p.advance_stage(&StageId::new(id), StageStatus::Completed, Map::new(), start)
                    .unwrap();
            }
        }
        if status == PipelineStatus::Failed {
            p.advance_stage(&StageId::new("deploy"), StageStatus::Failed, Map::new(), start)
                .unwrap();
        }
        p.transition(status, StatusMetadata::default(), start + after)
            .unwrap();
    }

    #[test]
    fn test_history_filter() {
        let now = Utc::now();
        let p = pipeline("production", now);

        let mut filter = HistoryFilter {
            environment: Some("production".into()),
            from: Some(now - Duration::hours(1)),
            to: Some(now),
            ..Default::default()
        };
        assert!(filter.matches(&p));

        filter.status = Some(PipelineStatus::Failed);
        assert!(!filter.matches(&p));

        let filter = HistoryFilter {
            from: Some(now + Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!filter.matches(&p));
    }

    #[test]
    fn test_limits() {
        let filter = HistoryFilter::default().with_limits(20, 100);
        assert_eq!(filter.limit, 20);
        let filter = HistoryFilter {
            limit: 500,
            ..Default::default()
        }
        .with_limits(20, 100);
        assert_eq!(filter.limit, 100);
    }

    #[test]
    fn test_summary_counts() {
        let now = Utc::now();
        let mut done = pipeline("staging", now);
        finish(&mut done, PipelineStatus::Completed, Duration::seconds(10));
        let queued = pipeline("staging", now);
        let prod = pipeline("production", now);

        let summary = PipelineSummary::from_pipelines([&done, &queued, &prod]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.active, 2);
        assert_eq!(summary.by_status["queued"], 2);
        assert_eq!(summary.by_status["completed"], 1);
        assert_eq!(summary.by_environment["staging"], 2);
    }

    #[test]
    fn test_metrics() {
        let now = Utc::now();
        let mut pipelines = Vec::new();
        for secs in [10, 20, 30, 40] {
            let mut p = pipeline("staging", now);
            finish(&mut p, PipelineStatus::Completed, Duration::seconds(secs));
            pipelines.push(p);
        }
        let mut failed = pipeline("staging", now);
        finish(&mut failed, PipelineStatus::Failed, Duration::seconds(100));
        pipelines.push(failed);
        pipelines.push(pipeline("staging", now));

        let metrics = PipelineMetrics::compute(&pipelines, 24);
        assert_eq!(metrics.total, 6);
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.completed, 4);
        assert_eq!(metrics.failed, 1);
        assert!((metrics.success_rate - 0.8).abs() < f64::EPSILON);
        assert_eq!(metrics.average_duration_ms, Some(40_000));
        assert_eq!(metrics.p95_duration_ms, Some(100_000));
        assert_eq!(metrics.stage_failures["deploy"], 1);
        assert_eq!(metrics.by_type["deploy"], 6);
    }

    #[test]
    fn test_metrics_empty() {
        let metrics = PipelineMetrics::compute(&[], 24);
        assert_eq!(metrics.total, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.p95_duration_ms, None);
    }
}
