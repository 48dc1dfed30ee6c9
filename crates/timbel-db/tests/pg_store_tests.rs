//! PostgreSQL store integration tests.
//!
//! Run with: `cargo test -p timbel-db --test pg_store_tests --features integration`

#![cfg(feature = "integration")]

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use timbel_core::Error;
use timbel_core::ids::StageId;
use timbel_core::logs::{LogEntry, LogInput};
use timbel_core::pipeline::{Pipeline, PipelineStatus, RegisterPipeline, StatusMetadata};
use timbel_core::ports::PipelineStore;
use timbel_core::query::{HistoryFilter, LogQuery};
use timbel_db::{Database, PgPipelineStore};

struct TestDb {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<Postgres>,
    store: PgPipelineStore,
}

async fn start(log_retention: usize) -> anyhow::Result<TestDb> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

    let db = Database::connect(&url, 5).await?;
    db.migrate().await?;

    Ok(TestDb {
        container,
        store: PgPipelineStore::new(db.pool().clone(), log_retention),
    })
}

fn pipeline(environment: &str) -> Pipeline {
    let spec = RegisterPipeline {
        pipeline_type: Some("build".into()),
        project_id: Some("proj-ecommerce".into()),
        repository_url: Some("https://git.example.com/shop.git".into()),
        branch: Some("main".into()),
        environment: Some(environment.into()),
        ..Default::default()
    }
    .validate()
    .unwrap();
    Pipeline::new(spec, Utc::now())
}

fn lines(pipeline: &Pipeline, stage: &str, messages: &[&str]) -> Vec<LogEntry> {
    messages
        .iter()
        .map(|m| {
            LogInput::Line(m.to_string()).into_entry(pipeline.id, StageId::new(stage), Utc::now())
        })
        .collect()
}

#[tokio::test]
async fn test_insert_get_and_versioned_update() {
    let db = start(100).await.expect("Failed to start postgres");
    let mut p = pipeline("staging");
    db.store.insert(&p).await.unwrap();

    let err = db.store.insert(&p).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let found = db.store.get(p.id).await.unwrap().expect("Pipeline not found");
    assert_eq!(found, p);

    let stale = p.clone();
    p.transition(PipelineStatus::Running, StatusMetadata::default(), Utc::now())
        .unwrap();
    p.version = db.store.update(&p).await.unwrap();
    assert_eq!(p.version, 1);

    let err = db.store.update(&stale).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let found = db.store.get(p.id).await.unwrap().unwrap();
    assert_eq!(found.status, PipelineStatus::Running);
    assert_eq!(found.version, 1);
    assert!(found.started_at.is_some());

    let ghost = pipeline("staging");
    let err = db.store.update(&ghost).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_history_summary_and_active() {
    let db = start(100).await.expect("Failed to start postgres");
    let now = Utc::now();
    for i in 0..4 {
        let mut p = pipeline("staging");
        p.queued_at = now - Duration::minutes(i);
        db.store.insert(&p).await.unwrap();
    }
    let mut failed = pipeline("production");
    failed
        .transition(PipelineStatus::Failed, StatusMetadata::default(), now)
        .unwrap();
    db.store.insert(&failed).await.unwrap();

    let page = db
        .store
        .history(&HistoryFilter {
            environment: Some("staging".into()),
            limit: 2,
            offset: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].queued_at > page.items[1].queued_at);

    let failures = db
        .store
        .history(&HistoryFilter {
            status: Some(PipelineStatus::Failed),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failures.total, 1);
    assert_eq!(failures.items[0].id, failed.id);

    let summary = db.store.summary().await.unwrap();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.active, 4);
    assert_eq!(summary.by_environment.get("production"), Some(&1));

    assert_eq!(db.store.list_active().await.unwrap().len(), 4);
    assert_eq!(
        db.store
            .queued_since(now - Duration::seconds(30))
            .await
            .unwrap()
            .len(),
        2
    );
    db.store.ping().await.unwrap();
}

#[tokio::test]
async fn test_log_sequences_and_retention() {
    let db = start(3).await.expect("Failed to start postgres");
    let p = pipeline("dev");
    db.store.insert(&p).await.unwrap();

    let first = db
        .store
        .append_logs(lines(&p, "build", &["a", "b"]))
        .await
        .unwrap();
    let second = db
        .store
        .append_logs(lines(&p, "unit-test", &["c", "d"]))
        .await
        .unwrap();
    let sequences: Vec<u64> = first.iter().chain(&second).map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);

    let all = db
        .store
        .logs(&LogQuery {
            pipeline_id: p.id,
            stage_id: None,
            after_sequence: None,
            limit: 100,
        })
        .await
        .unwrap();
    let messages: Vec<&str> = all.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["b", "c", "d"]);

    let unit = db
        .store
        .logs(&LogQuery {
            pipeline_id: p.id,
            stage_id: Some(StageId::new("unit-test")),
            after_sequence: Some(3),
            limit: 100,
        })
        .await
        .unwrap();
    assert_eq!(unit.len(), 1);
    assert_eq!(unit[0].message, "d");
}
