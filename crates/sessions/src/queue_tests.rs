// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fh_core::{EnvironmentId, StepId, TaskId};
use std::collections::BTreeMap;

fn env_enter(id: &str, env: &str) -> AssignedAction {
    AssignedAction {
        action_id: ActionId::new(id),
        kind: ActionKind::EnvEnter { environment_id: EnvironmentId::new(env) },
    }
}

fn env_exit(id: &str, env: &str) -> AssignedAction {
    AssignedAction {
        action_id: ActionId::new(id),
        kind: ActionKind::EnvExit { environment_id: EnvironmentId::new(env) },
    }
}

fn task_run(id: &str, step: &str) -> AssignedAction {
    AssignedAction {
        action_id: ActionId::new(id),
        kind: ActionKind::TaskRun {
            step_id: StepId::new(step),
            task_id: TaskId::new("task-1"),
            parameters: BTreeMap::new(),
        },
    }
}

fn sync_inputs(id: &str) -> AssignedAction {
    AssignedAction {
        action_id: ActionId::new(id),
        kind: ActionKind::SyncInputJobAttachments { step_id: None },
    }
}

fn ids(queue: &SessionActionQueue) -> Vec<String> {
    queue.actions.iter().map(|a| a.action_id.to_string()).collect()
}

#[test]
fn replace_preserves_order_and_skips_running() {
    let mut queue = SessionActionQueue::new();
    queue.replace(vec![env_enter("a-1", "env-1"), task_run("a-2", "step-1")], None);
    assert_eq!(ids(&queue), vec!["a-1", "a-2"]);

    // a-1 is now running; the service re-lists it plus a new action.
    queue.replace(
        vec![env_enter("a-1", "env-1"), task_run("a-2", "step-1"), env_exit("a-3", "env-1")],
        Some(&ActionId::new("a-1")),
    );
    assert_eq!(ids(&queue), vec!["a-2", "a-3"]);
}

#[test]
fn pop_front_is_fifo() {
    let mut queue = SessionActionQueue::new();
    queue.replace(vec![task_run("a-1", "s"), task_run("a-2", "s")], None);

    assert_eq!(queue.pop_front().unwrap().action_id, "a-1");
    assert_eq!(queue.pop_front().unwrap().action_id, "a-2");
    assert!(queue.pop_front().is_none());
    assert!(queue.is_empty());
}

#[test]
fn cancel_removes_single_entry() {
    let mut queue = SessionActionQueue::new();
    queue.replace(vec![task_run("a-1", "s"), task_run("a-2", "s")], None);

    let removed = queue.cancel(&ActionId::new("a-1")).unwrap();
    assert_eq!(removed.action_id, "a-1");
    assert!(queue.cancel(&ActionId::new("a-1")).is_none());
    assert_eq!(queue.len(), 1);
}

#[test]
fn cancel_all_keeps_env_exits() {
    let mut queue = SessionActionQueue::new();
    queue.replace(
        vec![
            task_run("a-2", "step-1"),
            task_run("a-3", "step-2"),
            env_exit("a-4", "env-1"),
            env_exit("a-5", "env-0"),
        ],
        None,
    );

    let removed = queue.cancel_all_except_env_exits();
    let removed_ids: Vec<_> = removed.iter().map(|a| a.action_id.to_string()).collect();
    assert_eq!(removed_ids, vec!["a-2", "a-3"]);
    assert_eq!(ids(&queue), vec!["a-4", "a-5"]);
}

#[test]
fn drain_all_empties_queue() {
    let mut queue = SessionActionQueue::new();
    queue.replace(vec![task_run("a-1", "s"), env_exit("a-2", "env-1")], None);

    let removed = queue.drain_all();
    assert_eq!(removed.len(), 2);
    assert!(queue.is_empty());
}

#[test]
fn entity_refs_deduplicate_in_order() {
    let job_id = JobId::new("job-1");
    let mut queue = SessionActionQueue::new();
    queue.replace(
        vec![
            sync_inputs("a-0"),
            env_enter("a-1", "env-1"),
            task_run("a-2", "step-1"),
            task_run("a-3", "step-1"),
            env_exit("a-4", "env-1"),
        ],
        None,
    );

    let refs = queue.entity_refs(&job_id);
    assert_eq!(refs.len(), 3);
    assert!(matches!(refs[0], EntityRef::JobAttachmentDetails { .. }));
    assert!(matches!(refs[1], EntityRef::EnvironmentDetails { .. }));
    assert!(matches!(refs[2], EntityRef::StepDetails { .. }));
}
