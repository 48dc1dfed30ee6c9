//! In-memory pipeline store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use timbel_core::ids::PipelineId;
use timbel_core::logs::LogEntry;
use timbel_core::pipeline::Pipeline;
use timbel_core::ports::PipelineStore;
use timbel_core::query::{HistoryFilter, LogQuery, Page, PipelineSummary};
use timbel_core::{Error, Result};
use tokio::sync::RwLock;

#[derive(Default)]
struct PipelineLog {
    last_sequence: u64,
    entries: VecDeque<LogEntry>,
}

/// Process-local store. Contents are lost on restart.
pub struct InMemoryPipelineStore {
    pipelines: RwLock<HashMap<PipelineId, Pipeline>>,
    logs: RwLock<HashMap<PipelineId, PipelineLog>>,
    log_retention: usize,
}

impl InMemoryPipelineStore {
    /// Create a store keeping at most `log_retention` log entries per pipeline.
    pub fn new(log_retention: usize) -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            log_retention: log_retention.max(1),
        }
    }
}

impl Default for InMemoryPipelineStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn newest_first(pipelines: &mut [Pipeline]) {
    pipelines.sort_by(|a, b| b.queued_at.cmp(&a.queued_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn insert(&self, pipeline: &Pipeline) -> Result<()> {
        let mut pipelines = self.pipelines.write().await;
        if pipelines.contains_key(&pipeline.id) {
            return Err(Error::Conflict(pipeline.id.to_string()));
        }
        pipelines.insert(pipeline.id, pipeline.clone());
        Ok(())
    }

    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(self.pipelines.read().await.get(&id).cloned())
    }

    async fn update(&self, pipeline: &Pipeline) -> Result<u64> {
        let mut pipelines = self.pipelines.write().await;
        let stored = pipelines
            .get_mut(&pipeline.id)
            .ok_or_else(|| Error::PipelineNotFound(pipeline.id.to_string()))?;

        if stored.version != pipeline.version {
            return Err(Error::Conflict(pipeline.id.to_string()));
        }

        let version = pipeline.version + 1;
        *stored = Pipeline {
            version,
            ..pipeline.clone()
        };
        Ok(version)
    }

    async fn list_active(&self) -> Result<Vec<Pipeline>> {
        let mut active: Vec<Pipeline> = self
            .pipelines
            .read()
            .await
            .values()
            .filter(|p| p.status.is_active())
            .cloned()
            .collect();
        newest_first(&mut active);
        Ok(active)
    }

    async fn history(&self, filter: &HistoryFilter) -> Result<Page<Pipeline>> {
        let mut matching: Vec<Pipeline> = self
            .pipelines
            .read()
            .await
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        newest_first(&mut matching);

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();

        Ok(Page {
            items,
            total,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    async fn queued_since(&self, since: DateTime<Utc>) -> Result<Vec<Pipeline>> {
        Ok(self
            .pipelines
            .read()
            .await
            .values()
            .filter(|p| p.queued_at >= since)
            .cloned()
            .collect())
    }

    async fn summary(&self) -> Result<PipelineSummary> {
        Ok(PipelineSummary::from_pipelines(
            self.pipelines.read().await.values(),
        ))
    }

    async fn append_logs(&self, mut entries: Vec<LogEntry>) -> Result<Vec<LogEntry>> {
        let Some(first) = entries.first() else {
            return Ok(entries);
        };
        let pipeline_id = first.pipeline_id;

        let mut logs = self.logs.write().await;
        let log = logs.entry(pipeline_id).or_default();
        for entry in entries.iter_mut() {
            log.last_sequence += 1;
            entry.sequence = log.last_sequence;
            log.entries.push_back(entry.clone());
        }
        while log.entries.len() > self.log_retention {
            log.entries.pop_front();
        }

        Ok(entries)
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>> {
        let logs = self.logs.read().await;
        let Some(log) = logs.get(&query.pipeline_id) else {
            return Ok(Vec::new());
        };

        Ok(log
            .entries
            .iter()
            .filter(|e| query.stage_id.as_ref().is_none_or(|s| &e.stage_id == s))
            .filter(|e| query.after_sequence.is_none_or(|after| e.sequence > after))
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use timbel_core::ids::StageId;
    use timbel_core::logs::LogInput;
    use timbel_core::pipeline::{PipelineStatus, RegisterPipeline, StatusMetadata};

    fn pipeline(environment: &str, queued_at: DateTime<Utc>) -> Pipeline {
        let spec = RegisterPipeline {
            pipeline_type: Some("build".into()),
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

    #[tokio::test]
    async fn test_update_enforces_version() {
        let store = InMemoryPipelineStore::default();
        let mut p = pipeline("dev", Utc::now());
        store.insert(&p).await.unwrap();

        let stale = p.clone();
        p.transition(PipelineStatus::Running, StatusMetadata::default(), Utc::now())
            .unwrap();
        let version = store.update(&p).await.unwrap();
        assert_eq!(version, 1);

        let err = store.update(&stale).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PipelineStatus::Running);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_history_pagination_newest_first() {
        let store = InMemoryPipelineStore::default();
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert(&pipeline("staging", now - Duration::minutes(i)))
                .await
                .unwrap();
        }
        store.insert(&pipeline("production", now)).await.unwrap();

        let filter = HistoryFilter {
            environment: Some("staging".into()),
            limit: 2,
            offset: 1,
            ..Default::default()
        };
        let page = store.history(&filter).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].queued_at, now - Duration::minutes(1));
        assert_eq!(page.items[1].queued_at, now - Duration::minutes(2));
    }

    #[tokio::test]
    async fn test_logs_sequence_and_retention() {
        let store = InMemoryPipelineStore::new(3);
        let id = PipelineId::new();
        let now = Utc::now();
        let entries: Vec<LogEntry> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|m| LogInput::Line(m.into()).into_entry(id, StageId::new("build"), now))
            .collect();

        let stored = store.append_logs(entries).await.unwrap();
        let sequences: Vec<u64> = stored.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);

        let read = store
            .logs(&LogQuery {
                pipeline_id: id,
                stage_id: None,
                after_sequence: Some(2),
                limit: 100,
            })
            .await
            .unwrap();
        let messages: Vec<&str> = read.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["c", "d"]);

        let retained = store
            .logs(&LogQuery {
                pipeline_id: id,
                stage_id: Some(StageId::new("build")),
                after_sequence: None,
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(retained.len(), 3);
        assert_eq!(retained[0].message, "b");
    }
}
