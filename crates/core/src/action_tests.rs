// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

fn ts(secs: i64) -> DateTime<Utc> {
    chrono::TimeZone::timestamp_opt(&Utc, secs, 0).single().unwrap()
}

#[test]
fn action_kind_env_exit_detection() {
    let exit = ActionKind::EnvExit { environment_id: EnvironmentId::new("env-1") };
    let enter = ActionKind::EnvEnter { environment_id: EnvironmentId::new("env-1") };

    assert!(exit.is_env_exit());
    assert!(!enter.is_env_exit());
}

#[test]
fn action_kind_wire_format() {
    let kind = ActionKind::TaskRun {
        step_id: StepId::new("step-1"),
        task_id: TaskId::new("task-1"),
        parameters: BTreeMap::new(),
    };
    let json = serde_json::to_value(&kind).unwrap();
    assert_eq!(json["actionType"], "TASK_RUN");
    assert_eq!(json["step_id"], "step-1");

    let sync = ActionKind::SyncInputJobAttachments { step_id: None };
    let json = serde_json::to_value(&sync).unwrap();
    assert_eq!(json["actionType"], "SYNC_INPUT_JOB_ATTACHMENTS");
}

#[test]
fn completed_status_display_matches_wire_vocabulary() {
    assert_eq!(CompletedStatus::Succeeded.to_string(), "SUCCEEDED");
    assert_eq!(CompletedStatus::NeverAttempted.to_string(), "NEVER_ATTEMPTED");
    assert_eq!(
        serde_json::to_string(&CompletedStatus::Interrupted).unwrap(),
        "\"INTERRUPTED\""
    );
}

#[test]
fn unsuccessful_statuses() {
    assert!(!CompletedStatus::Succeeded.is_unsuccessful());
    assert!(CompletedStatus::Failed.is_unsuccessful());
    assert!(CompletedStatus::Canceled.is_unsuccessful());
    assert!(CompletedStatus::Interrupted.is_unsuccessful());
}

#[test]
fn never_attempted_has_no_timestamps() {
    let update = ActionUpdate::never_attempted(ActionId::new("a-1"), Some("skipped".into()));
    assert_eq!(update.completed_status, Some(CompletedStatus::NeverAttempted));
    assert!(update.started_at.is_none());
    assert!(update.ended_at.is_none());
    assert!(update.updated_at.is_none());
}

#[test]
fn completed_carries_both_timestamps() {
    let update = ActionUpdate::completed(
        ActionId::new("a-1"),
        CompletedStatus::Succeeded,
        ts(100),
        ts(160),
        None,
        Some(0),
    );
    assert_eq!(update.started_at, Some(ts(100)));
    assert_eq!(update.ended_at, Some(ts(160)));
    assert!(update.is_terminal());
    assert!(!update.needs_immediate_report());
}

#[test]
fn failed_canceled_interrupted_need_immediate_report() {
    for status in [
        CompletedStatus::Failed,
        CompletedStatus::Canceled,
        CompletedStatus::Interrupted,
    ] {
        let update =
            ActionUpdate::completed(ActionId::new("a-1"), status, ts(1), ts(2), None, None);
        assert!(update.needs_immediate_report(), "{status}");
    }
    let update = ActionUpdate::never_attempted(ActionId::new("a-2"), None);
    assert!(!update.needs_immediate_report());
}

#[test]
fn running_update_is_not_terminal() {
    let update = ActionUpdate::running(
        ActionId::new("a-1"),
        ts(100),
        ts(110),
        Some(42.0),
        Some("rendering frame 42".into()),
    );
    assert!(!update.is_terminal());
    assert!(update.ended_at.is_none());
    assert_eq!(update.updated_at, Some(ts(110)));
}

proptest! {
    // NEVER_ATTEMPTED never carries timestamps, regardless of message content.
    #[test]
    fn prop_never_attempted_timestamp_free(msg in proptest::option::of(".*")) {
        let update = ActionUpdate::never_attempted(ActionId::new("a-p"), msg);
        prop_assert!(update.started_at.is_none());
        prop_assert!(update.ended_at.is_none());
    }
}
