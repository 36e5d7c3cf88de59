// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn assigned_action_roundtrip() {
    let json = serde_json::json!({
        "sessionActionId": "sessionaction-1",
        "actionType": "TASK_RUN",
        "step_id": "step-1",
        "task_id": "task-1",
    });
    let action: AssignedAction = serde_json::from_value(json).unwrap();
    assert_eq!(action.action_id, "sessionaction-1");
    assert!(matches!(action.kind, ActionKind::TaskRun { .. }));
}

#[test]
fn schedule_response_defaults() {
    let response: ScheduleResponse =
        serde_json::from_value(serde_json::json!({"updateIntervalSeconds": 15})).unwrap();
    assert!(response.assigned_sessions.is_empty());
    assert!(response.cancel_session_actions.is_empty());
    assert_eq!(response.update_interval(), Duration::from_secs(15));
    assert!(response.desired_worker_status.is_none());
}

#[test]
fn schedule_response_desired_status() {
    let response: ScheduleResponse = serde_json::from_value(serde_json::json!({
        "updateIntervalSeconds": 30,
        "desiredWorkerStatus": "STOPPED",
    }))
    .unwrap();
    assert_eq!(response.desired_worker_status, Some(DesiredWorkerStatus::Stopped));
}

#[test]
fn entity_ref_cache_keys() {
    let job = JobId::new("job-1");
    assert_eq!(EntityRef::JobDetails { job_id: job.clone() }.cache_key(), "job-1");
    assert_eq!(
        EntityRef::StepDetails { job_id: job.clone(), step_id: StepId::new("step-9") }.cache_key(),
        "step-9"
    );
    assert_eq!(
        EntityRef::EnvironmentDetails {
            job_id: job.clone(),
            environment_id: EnvironmentId::new("env-3"),
        }
        .cache_key(),
        "env-3"
    );
    assert_eq!(EntityRef::JobAttachmentDetails { job_id: job }.cache_key(), "JA(job-1)");
}

#[test]
fn entity_data_cache_key_matches_ref() {
    let data = EntityData::StepDetails(StepDetailsData {
        job_id: JobId::new("job-1"),
        step_id: StepId::new("step-9"),
        schema_version: "jobtemplate-2023-09".into(),
        template: serde_json::json!({}),
        dependencies: vec![],
    });
    let entity_ref = EntityRef::StepDetails {
        job_id: JobId::new("job-1"),
        step_id: StepId::new("step-9"),
    };
    assert_eq!(data.cache_key(), entity_ref.cache_key());
}

#[test]
fn updated_action_info_skips_empty_fields() {
    let info = UpdatedActionInfo {
        completed_status: Some(CompletedStatus::Succeeded),
        ..Default::default()
    };
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json, serde_json::json!({"completedStatus": "SUCCEEDED"}));
}
