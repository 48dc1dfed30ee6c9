//! Pipeline log persistence.

use sqlx::{PgPool, QueryBuilder, Row};
use timbel_core::ids::{PipelineId, StageId};
use timbel_core::logs::{LogEntry, LogLevel};
use timbel_core::query::LogQuery;
use timbel_core::{Error, Result};

use super::pipeline::db_error;

/// Rows per INSERT; keeps the bind count well under the Postgres limit.
const INSERT_CHUNK: usize = 1000;

/// Append `entries` (all for one pipeline) in a single transaction.
pub(super) async fn append(
    pool: &PgPool,
    retention: usize,
    mut entries: Vec<LogEntry>,
) -> Result<Vec<LogEntry>> {
    let Some(first) = entries.first() else {
        return Ok(entries);
    };
    let pipeline_id = first.pipeline_id;
    let count = entries.len() as i64;

    let mut tx = pool.begin().await.map_err(db_error)?;

    // Reserves `count` sequence numbers; the row lock serializes concurrent appends.
    let last: i64 = sqlx::query_scalar(
        "INSERT INTO pipeline_log_sequences (pipeline_id, last_sequence) VALUES ($1, $2) ON CONFLICT (pipeline_id) DO UPDATE SET last_sequence = pipeline_log_sequences.last_sequence + EXCLUDED.last_sequence RETURNING last_sequence"
    )
    .bind(pipeline_id.as_uuid())
    .bind(count)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_error)?;

    let first_sequence = (last - count + 1) as u64;
    for (offset, entry) in entries.iter_mut().enumerate() {
        entry.sequence = first_sequence + offset as u64;
    }

    for chunk in entries.chunks(INSERT_CHUNK) {
        let mut insert = QueryBuilder::new(
            "INSERT INTO pipeline_logs (pipeline_id, sequence, stage_id, level, message, logged_at) ",
        );
        insert.push_values(chunk, |mut row, entry| {
            row.push_bind(*entry.pipeline_id.as_uuid())
                .push_bind(entry.sequence as i64)
                .push_bind(entry.stage_id.as_str().to_string())
                .push_bind(entry.level.as_str())
                .push_bind(entry.message.clone())
                .push_bind(entry.timestamp);
        });
        insert
            .build()
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
    }

    let cutoff = last - retention as i64;
    if cutoff > 0 {
        sqlx::query("DELETE FROM pipeline_logs WHERE pipeline_id = $1 AND sequence <= $2")
            .bind(pipeline_id.as_uuid())
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
    }

    tx.commit().await.map_err(db_error)?;
    Ok(entries)
}

pub(super) async fn read(pool: &PgPool, query: &LogQuery) -> Result<Vec<LogEntry>> {
    let mut select = QueryBuilder::new(
        "SELECT pipeline_id, sequence, stage_id, level, message, logged_at FROM pipeline_logs WHERE pipeline_id = ",
    );
    select.push_bind(*query.pipeline_id.as_uuid());
    if let Some(stage_id) = &query.stage_id {
        select
            .push(" AND stage_id = ")
            .push_bind(stage_id.as_str().to_string());
    }
    if let Some(after) = query.after_sequence {
        select.push(" AND sequence > ").push_bind(after as i64);
    }
    select
        .push(" ORDER BY sequence LIMIT ")
        .push_bind(i64::from(query.limit));

    let rows = select.build().fetch_all(pool).await.map_err(db_error)?;

    rows.iter()
        .map(|r| {
            let level: String = r.get("level");
            Ok(LogEntry {
                pipeline_id: PipelineId::from_uuid(r.get::<uuid::Uuid, _>("pipeline_id")),
                stage_id: StageId::new(r.get::<String, _>("stage_id")),
                sequence: r.get::<i64, _>("sequence") as u64,
                timestamp: r.get("logged_at"),
                level: level
                    .parse::<LogLevel>()
                    .map_err(|_| Error::Database(format!("unknown log level '{}'", level)))?,
                message: r.get("message"),
            })
        })
        .collect()
}
