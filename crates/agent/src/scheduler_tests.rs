// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;
use fh_api::test_support::{schedule_with, worker_ids, Call, FakeClient};
use fh_api::{BatchEntityResponse, EntityErrorCode, EntityFailure, EntityRef, UpdatedActionInfo};
use fh_core::{ActionKind, CompletedStatus, EnvironmentId, JobId, StepId, SystemClock, TaskId};
use fh_sessions::{ActionOutcome, FakeRunner, ScriptedOutcome};
use std::collections::BTreeMap;

fn config_in(dir: &std::path::Path) -> Arc<AgentConfig> {
    let mut args: Vec<String> = ["farmhand-agent", "--farm-id", "farm-1", "--fleet-id", "fleet-1"]
        .map(String::from)
        .to_vec();
    args.push("--persistence-dir".into());
    args.push(dir.join("state").display().to_string());
    args.push("--sessions-dir".into());
    args.push(dir.join("sessions").display().to_string());
    Arc::new(AgentConfig::try_parse_from(args).unwrap())
}

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

fn session(actions: Vec<AssignedAction>) -> AssignedSession {
    AssignedSession {
        queue_id: QueueId::new("queue-Q"),
        job_id: JobId::new("job-1"),
        actions,
        log_configuration: None,
    }
}

struct Fixture {
    client: Arc<FakeClient>,
    runner: Arc<FakeRunner>,
    drain: DrainState,
    config: Arc<AgentConfig>,
    _tmp: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    Fixture {
        client: Arc::new(FakeClient::new()),
        runner: Arc::new(FakeRunner::new()),
        drain: DrainState::new(),
        config: config_in(tmp.path()),
        _tmp: tmp,
    }
}

impl Fixture {
    fn scheduler(&self) -> Scheduler<FakeRunner, SystemClock> {
        Scheduler::new(
            self.client.clone() as Arc<dyn ServiceClient>,
            worker_ids(),
            self.config.clone(),
            self.runner.clone(),
            SystemClock,
            self.drain.clone(),
        )
    }
}

/// Poll until the client has seen a schedule call satisfying `predicate`.
async fn wait_for_update_call<F>(client: &FakeClient, predicate: F)
where
    F: Fn(&BTreeMap<ActionId, UpdatedActionInfo>) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if client.schedule_updates().iter().any(|u| predicate(u)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for a matching UpdateWorkerSchedule call");
}

fn status_in(
    updates: &BTreeMap<ActionId, UpdatedActionInfo>,
    id: &str,
) -> Option<CompletedStatus> {
    updates.get(&ActionId::new(id)).and_then(|u| u.completed_status)
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_reports_three_successes() {
    let fx = fixture();
    fx.client.push_schedule(Ok(schedule_with(vec![(
        SessionId::new("session-A"),
        session(vec![
            env_enter("a-1", "env-1"),
            task_run("a-2", "step-1"),
            env_exit("a-3", "env-1"),
        ]),
    )])));

    let mut scheduler = fx.scheduler();
    let drain = fx.drain.clone();
    let task = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (scheduler, exit)
    });

    wait_for_update_call(&fx.client, |updates| {
        ["a-1", "a-2", "a-3"]
            .iter()
            .all(|id| status_in(updates, id) == Some(CompletedStatus::Succeeded))
    })
    .await;

    drain.request(DrainRequest::expedited("test over"));
    let (_, exit) = task.await.unwrap();
    assert!(matches!(exit, SchedulerExit::Drain));

    // Every reported success carries timestamps.
    let call = fx
        .client
        .schedule_updates()
        .into_iter()
        .find(|u| status_in(u, "a-2") == Some(CompletedStatus::Succeeded))
        .unwrap();
    let info = &call[&ActionId::new("a-2")];
    assert!(info.started_at.is_some());
    assert!(info.ended_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn task_failure_skips_and_still_runs_env_exit() {
    let fx = fixture();
    fx.runner.script(
        ActionId::new("a-2"),
        ScriptedOutcome::Finish(ActionOutcome::failed(Some(137), "exit 137")),
    );
    fx.client.push_schedule(Ok(schedule_with(vec![(
        SessionId::new("session-A"),
        session(vec![
            env_enter("a-1", "env-1"),
            task_run("a-2", "step-1"),
            task_run("a-3", "step-2"),
            env_exit("a-4", "env-1"),
        ]),
    )])));

    let mut scheduler = fx.scheduler();
    let drain = fx.drain.clone();
    let task = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (scheduler, exit)
    });

    wait_for_update_call(&fx.client, |updates| {
        status_in(updates, "a-2") == Some(CompletedStatus::Failed)
            && status_in(updates, "a-3") == Some(CompletedStatus::NeverAttempted)
    })
    .await;
    wait_for_update_call(&fx.client, |updates| {
        status_in(updates, "a-4") == Some(CompletedStatus::Succeeded)
    })
    .await;

    let call = fx
        .client
        .schedule_updates()
        .into_iter()
        .find(|u| status_in(u, "a-3") == Some(CompletedStatus::NeverAttempted))
        .unwrap();
    let skipped = &call[&ActionId::new("a-3")];
    assert!(skipped.started_at.is_none());
    assert!(skipped.ended_at.is_none());
    let failed = &call[&ActionId::new("a-2")];
    assert_eq!(failed.process_exit_code, Some(137));

    drain.request(DrainRequest::expedited("test over"));
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn service_cancel_midway_orders_reports() {
    let fx = fixture();
    fx.runner.script(ActionId::new("a-2"), ScriptedOutcome::RunUntilCanceled);
    let actions = vec![
        env_enter("a-1", "env-1"),
        task_run("a-2", "step-1"),
        task_run("a-3", "step-2"),
        env_exit("a-4", "env-1"),
    ];
    let assignment = schedule_with(vec![(SessionId::new("session-A"), session(actions))]);
    let mut keepalive = assignment.clone();
    keepalive.update_interval_seconds = 1;
    fx.client.push_schedule(Ok(keepalive.clone()));
    fx.client.set_default_schedule(keepalive.clone());

    let mut scheduler = fx.scheduler();
    let drain = fx.drain.clone();
    let task = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (scheduler, exit)
    });

    // Wait until the long-running task is actually in flight, then cancel
    // it (and the task queued behind it) from the service.
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if fx.runner.started().iter().any(|a| a == "a-2") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let mut canceling = keepalive.clone();
    canceling.cancel_session_actions = [(
        SessionId::new("session-A"),
        vec![ActionId::new("a-2"), ActionId::new("a-3")],
    )]
    .into_iter()
    .collect();
    fx.client.push_schedule(Ok(canceling));

    wait_for_update_call(&fx.client, |updates| {
        status_in(updates, "a-2") == Some(CompletedStatus::Canceled)
    })
    .await;
    wait_for_update_call(&fx.client, |updates| {
        status_in(updates, "a-3") == Some(CompletedStatus::NeverAttempted)
    })
    .await;
    wait_for_update_call(&fx.client, |updates| {
        status_in(updates, "a-4") == Some(CompletedStatus::Succeeded)
    })
    .await;

    // The canceled running action is never reported later than the
    // never-attempted action behind it.
    let calls = fx.client.schedule_updates();
    let canceled_at = calls
        .iter()
        .position(|u| status_in(u, "a-2") == Some(CompletedStatus::Canceled))
        .unwrap();
    let skipped_at = calls
        .iter()
        .position(|u| status_in(u, "a-3") == Some(CompletedStatus::NeverAttempted))
        .unwrap();
    assert!(canceled_at <= skipped_at);

    // Canceled carries timestamps; never-attempted does not.
    let canceled = &calls[canceled_at][&ActionId::new("a-2")];
    assert!(canceled.started_at.is_some());
    assert!(canceled.ended_at.is_some());
    let skipped = &calls[skipped_at][&ActionId::new("a-3")];
    assert!(skipped.started_at.is_none());

    drain.request(DrainRequest::expedited("test over"));
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn expedited_drain_reports_and_stops() {
    let fx = fixture();
    fx.runner.script(ActionId::new("a-2"), ScriptedOutcome::RunUntilCanceled);
    let assignment = schedule_with(vec![(
        SessionId::new("session-A"),
        session(vec![
            env_enter("a-1", "env-1"),
            task_run("a-2", "step-1"),
            task_run("a-3", "step-2"),
            env_exit("a-4", "env-1"),
        ]),
    )]);
    fx.client.push_schedule(Ok(assignment.clone()));
    fx.client.set_default_schedule(assignment);

    let mut scheduler = fx.scheduler();
    let drain = fx.drain.clone();
    let task = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (scheduler, exit)
    });

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if fx.runner.started().iter().any(|a| a == "a-2") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    drain.request(DrainRequest::expedited("host terminating"));
    let (scheduler, exit) = task.await.unwrap();
    assert!(matches!(exit, SchedulerExit::Drain));
    scheduler.drain(drain.current().unwrap()).await;

    // STOPPING fired, then a single flush carrying the interrupted and
    // never-attempted statuses, then STOPPED.
    let calls = fx.client.calls();
    let stopping = calls
        .iter()
        .position(|c| matches!(c, Call::UpdateWorker { target: WorkerTargetStatus::Stopping }))
        .expect("UpdateWorker(STOPPING) fired");
    let stopped = calls
        .iter()
        .position(|c| matches!(c, Call::UpdateWorker { target: WorkerTargetStatus::Stopped }))
        .expect("UpdateWorker(STOPPED) fired");
    assert!(stopping < stopped);

    let flush = fx
        .client
        .schedule_updates()
        .into_iter()
        .find(|u| status_in(u, "a-2") == Some(CompletedStatus::Interrupted))
        .expect("flush call with INTERRUPTED status");
    assert_eq!(status_in(&flush, "a-3"), Some(CompletedStatus::NeverAttempted));
    assert_eq!(status_in(&flush, "a-4"), Some(CompletedStatus::NeverAttempted));
}

#[tokio::test(flavor = "multi_thread")]
async fn service_stop_with_clear_assignments() {
    let fx = fixture();
    fx.client.push_schedule(Ok(ScheduleResponse {
        update_interval_seconds: 15,
        desired_worker_status: Some(DesiredWorkerStatus::Stopped),
        ..Default::default()
    }));

    let mut scheduler = fx.scheduler();
    let exit = scheduler.run().await;
    assert!(matches!(exit, SchedulerExit::ServiceStop));

    scheduler.service_stop().await;
    let targets: Vec<_> = fx
        .client
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::UpdateWorker { target } => Some(target),
            _ => None,
        })
        .collect();
    assert_eq!(targets, vec![WorkerTargetStatus::Stopping, WorkerTargetStatus::Stopped]);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_with_assignments_is_ignored() {
    let fx = fixture();
    let mut bad = schedule_with(vec![(
        SessionId::new("session-A"),
        session(vec![task_run("a-1", "step-1")]),
    )]);
    bad.desired_worker_status = Some(DesiredWorkerStatus::Stopped);
    bad.update_interval_seconds = 1;
    fx.client.push_schedule(Ok(bad));

    let mut scheduler = fx.scheduler();
    let drain = fx.drain.clone();
    let task = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (scheduler, exit)
    });

    // The protocol violation is ignored: the session still runs to
    // completion instead of the loop exiting.
    wait_for_update_call(&fx.client, |updates| {
        status_in(updates, "a-1") == Some(CompletedStatus::Succeeded)
    })
    .await;

    drain.request(DrainRequest::expedited("test over"));
    let (_, exit) = task.await.unwrap();
    assert!(matches!(exit, SchedulerExit::Drain));
}

#[tokio::test(flavor = "multi_thread")]
async fn job_details_failure_fails_first_action_and_skips_rest() {
    let fx = fixture();
    fx.client.push_batch_get(Ok(BatchEntityResponse {
        entities: vec![],
        errors: vec![EntityFailure {
            entity: EntityRef::JobDetails { job_id: JobId::new("job-1") },
            code: EntityErrorCode::NotFound,
            message: "job was deleted".into(),
        }],
    }));
    fx.client.push_schedule(Ok(schedule_with(vec![(
        SessionId::new("session-A"),
        session(vec![
            env_enter("a-1", "env-1"),
            task_run("a-2", "step-1"),
            env_exit("a-3", "env-1"),
        ]),
    )])));

    let mut scheduler = fx.scheduler();
    let drain = fx.drain.clone();
    let task = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (scheduler, exit)
    });

    wait_for_update_call(&fx.client, |updates| {
        status_in(updates, "a-1") == Some(CompletedStatus::Failed)
            && status_in(updates, "a-2") == Some(CompletedStatus::NeverAttempted)
            && status_in(updates, "a-3") == Some(CompletedStatus::NeverAttempted)
    })
    .await;

    // No action ever reached the runner.
    assert!(fx.runner.started().is_empty());

    drain.request(DrainRequest::expedited("test over"));
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_status_conflict_returns_offline() {
    let fx = fixture();
    fx.client.push_schedule(Err(fh_api::ServiceError::conflict(
        fh_api::ConflictReason::StatusConflict,
        "worker-1",
        None,
    )));

    let mut scheduler = fx.scheduler();
    let exit = scheduler.run().await;
    assert!(matches!(exit, SchedulerExit::WorkerOffline));
    scheduler.abandon().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn terminal_status_survives_failed_report_until_sent() {
    let fx = fixture();
    fx.runner.script(
        ActionId::new("a-1"),
        ScriptedOutcome::Finish(ActionOutcome::failed(Some(1), "boom")),
    );
    fx.client.push_schedule(Ok(schedule_with(vec![(
        SessionId::new("session-A"),
        session(vec![task_run("a-1", "step-1")]),
    )])));
    // The next report attempt is throttled once before succeeding, so the
    // terminal status must be re-sent.
    fx.client.push_schedule(Err(fh_api::ServiceError::Throttled { retry_after: None }));

    let mut scheduler = fx.scheduler();
    let drain = fx.drain.clone();
    let task = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (scheduler, exit)
    });

    wait_for_update_call(&fx.client, |updates| {
        status_in(updates, "a-1") == Some(CompletedStatus::Failed)
    })
    .await;

    drain.request(DrainRequest::expedited("test over"));
    task.await.unwrap();
}
