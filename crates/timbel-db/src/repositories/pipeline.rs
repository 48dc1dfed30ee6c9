//! PostgreSQL implementation of PipelineStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use timbel_core::ids::PipelineId;
use timbel_core::logs::LogEntry;
use timbel_core::pipeline::{Pipeline, PipelineStatus};
use timbel_core::ports::PipelineStore;
use timbel_core::query::{HistoryFilter, LogQuery, Page, PipelineSummary};
use timbel_core::{Error, Result};
use tracing::debug;

use super::logs;

const COLUMNS: &str = "SELECT document, version FROM pipelines";

/// PostgreSQL implementation of PipelineStore.
#[derive(Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
    log_retention: usize,
}

impl PgPipelineStore {
    /// Create a store keeping at most `log_retention` log entries per pipeline.
    pub fn new(pool: PgPool, log_retention: usize) -> Self {
        Self {
            pool,
            log_retention: log_retention.max(1),
        }
    }
}

pub(super) fn db_error(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

fn decode(row: &PgRow) -> Result<Pipeline> {
    let document: serde_json::Value = row.get("document");
    let mut pipeline: Pipeline =
        serde_json::from_value(document).map_err(|e| Error::Serialization(e.to_string()))?;
    pipeline.version = row.get::<i64, _>("version") as u64;
    Ok(pipeline)
}

fn encode(pipeline: &Pipeline) -> Result<serde_json::Value> {
    serde_json::to_value(pipeline).map_err(|e| Error::Serialization(e.to_string()))
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filter: &HistoryFilter) {
    query.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(environment) = &filter.environment {
        query.push(" AND environment = ").push_bind(environment.clone());
    }
    if let Some(project_id) = &filter.project_id {
        query.push(" AND project_id = ").push_bind(project_id.clone());
    }
    if let Some(pipeline_type) = filter.pipeline_type {
        query
            .push(" AND pipeline_type = ")
            .push_bind(pipeline_type.as_str());
    }
    if let Some(from) = filter.from {
        query.push(" AND queued_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        query.push(" AND queued_at <= ").push_bind(to);
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn insert(&self, pipeline: &Pipeline) -> Result<()> {
        let document = encode(pipeline)?;

        sqlx::query(
            "INSERT INTO pipelines (id, pipeline_type, project_id, environment, status, queued_at, updated_at, completed_at, version, document) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        )
        .bind(pipeline.id.as_uuid())
        .bind(pipeline.pipeline_type.as_str())
        .bind(&pipeline.project_id)
        .bind(&pipeline.environment)
        .bind(pipeline.status.as_str())
        .bind(pipeline.queued_at)
        .bind(pipeline.updated_at)
        .bind(pipeline.completed_at)
        .bind(pipeline.version as i64)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Conflict(pipeline.id.to_string())
            }
            e => db_error(e),
        })?;

        Ok(())
    }

    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        let row = sqlx::query(&format!("{} WHERE id = $1", COLUMNS))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn update(&self, pipeline: &Pipeline) -> Result<u64> {
        let document = encode(pipeline)?;

        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE pipelines SET status = $3, updated_at = $4, completed_at = $5, document = $6, version = version + 1 WHERE id = $1 AND version = $2 RETURNING version"
        )
        .bind(pipeline.id.as_uuid())
        .bind(pipeline.version as i64)
        .bind(pipeline.status.as_str())
        .bind(pipeline.updated_at)
        .bind(pipeline.completed_at)
        .bind(&document)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match version {
            Some(version) => Ok(version as u64),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pipelines WHERE id = $1)")
                        .bind(pipeline.id.as_uuid())
                        .fetch_one(&self.pool)
                        .await
                        .map_err(db_error)?;

                if exists {
                    debug!(pipeline_id = %pipeline.id, version = pipeline.version, "Stale pipeline version");
                    Err(Error::Conflict(pipeline.id.to_string()))
                } else {
                    Err(Error::PipelineNotFound(pipeline.id.to_string()))
                }
            }
        }
    }

    async fn list_active(&self) -> Result<Vec<Pipeline>> {
        let active: Vec<&str> = PipelineStatus::ALL
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.as_str())
            .collect();

        let rows = sqlx::query(&format!(
            "{} WHERE status = ANY($1) ORDER BY queued_at DESC, id DESC",
            COLUMNS
        ))
        .bind(&active)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(decode).collect()
    }

    async fn history(&self, filter: &HistoryFilter) -> Result<Page<Pipeline>> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM pipelines");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let mut select = QueryBuilder::new(COLUMNS);
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY queued_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset));

        let rows = select
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let items = rows.iter().map(decode).collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: total as u64,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    async fn queued_since(&self, since: DateTime<Utc>) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query(&format!("{} WHERE queued_at >= $1", COLUMNS))
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(decode).collect()
    }

    async fn summary(&self) -> Result<PipelineSummary> {
        let rows = sqlx::query(
            "SELECT status, environment, COUNT(*) AS count FROM pipelines GROUP BY status, environment",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut summary = PipelineSummary::default();
        for r in rows {
            let status: String = r.get("status");
            let status: PipelineStatus = status
                .parse()
                .map_err(|_| Error::Database(format!("unknown pipeline status '{}'", status)))?;
            let environment: String = r.get("environment");
            summary.record(status, &environment, r.get::<i64, _>("count") as u64);
        }

        Ok(summary)
    }

    async fn append_logs(&self, entries: Vec<LogEntry>) -> Result<Vec<LogEntry>> {
        logs::append(&self.pool, self.log_retention, entries).await
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>> {
        logs::read(&self.pool, query).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
