//! Wire-format tests for timbel-core types.

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use timbel_core::events::Event;
use timbel_core::ids::StageId;
use timbel_core::pipeline::*;
use timbel_core::stage::StageStatus;

fn registered() -> Pipeline {
    let request: RegisterPipeline = serde_json::from_value(json!({
        "type": "full_cicd",
        "projectId": "proj-42",
        "repositoryUrl": "https://git.example.com/app.git",
        "branch": "release/1.4",
        "environment": "production",
        "commitSha": "9f3c2ab",
        "metadata": {"ticket": "OPS-118"}
    }))
    .expect("deserialize registration");

    Pipeline::new(request.validate().expect("valid"), Utc::now())
}

#[test]
fn test_registration_uses_camel_case_and_type_key() {
    let pipeline = registered();
    assert_eq!(pipeline.pipeline_type, PipelineType::FullCicd);
    assert_eq!(pipeline.project_id, "proj-42");
    assert_eq!(pipeline.stages.len(), 7);
    assert_eq!(pipeline.metadata["ticket"], "OPS-118");
}

#[test]
fn test_pipeline_json_shape() {
    let pipeline = registered();
    let value = serde_json::to_value(&pipeline).expect("serialize");

    assert_eq!(value["type"], "full_cicd");
    assert_eq!(value["status"], "queued");
    assert_eq!(value["repositoryUrl"], "https://git.example.com/app.git");
    assert_eq!(value["stages"][3]["id"], "security-scan");
    assert_eq!(value["stages"][3]["order"], 3);
    assert_eq!(value["stages"][3]["status"], "pending");
    assert!(value["completedAt"].is_null());

    let parsed: Pipeline = serde_json::from_value(value).expect("deserialize");
    assert_eq!(parsed, pipeline);
}

#[test]
fn test_status_metadata_keeps_extra_fields() {
    let metadata: StatusMetadata = serde_json::from_value(json!({
        "reason": "manual hold",
        "actor": "ops@example.com",
        "ticket": "CHG-7"
    }))
    .expect("deserialize");

    assert_eq!(metadata.reason.as_deref(), Some("manual hold"));
    assert_eq!(metadata.details["ticket"], "CHG-7");
}

#[test]
fn test_stage_event_payload() {
    let mut pipeline = registered();
    let advance = pipeline
        .advance_stage(
            &StageId::new("checkout"),
            StageStatus::Running,
            serde_json::Map::new(),
            Utc::now(),
        )
        .expect("advance");

    let event = Event::stage_updated(&pipeline, &advance.stage);
    let value = serde_json::to_value(&event).expect("serialize");
    assert_eq!(value["type"], "stage_updated");
    assert_eq!(value["pipelineStatus"], "running");
    assert_eq!(value["stage"]["status"], "running");
    assert_eq!(value["projectId"], "proj-42");
}

#[test]
fn test_event_schema_generation() {
    let schema = schemars::schema_for!(Event);
    let value = serde_json::to_value(&schema).expect("serialize schema");
    assert!(value.get("oneOf").is_some() || value.get("anyOf").is_some());
}
