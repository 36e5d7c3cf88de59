// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;
use fh_api::test_support::{Call, FakeClient};
use fh_core::{SystemClock, WorkerTargetStatus};
use fh_sessions::FakeRunner;

fn config_in(dir: &std::path::Path, extra: &[&str]) -> AgentConfig {
    let mut args = vec![
        "farmhand-agent".to_string(),
        "--farm-id".into(),
        "farm-1".into(),
        "--fleet-id".into(),
        "fleet-1".into(),
        "--persistence-dir".into(),
        dir.join("state").display().to_string(),
        "--sessions-dir".into(),
        dir.join("sessions").display().to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    AgentConfig::try_parse_from(args).unwrap()
}

fn worker_with(client: Arc<FakeClient>, config: AgentConfig) -> Worker<FakeRunner, SystemClock> {
    Worker::new(
        client as Arc<dyn ServiceClient>,
        Arc::new(FakeRunner::new()),
        SystemClock,
        config,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn service_drain_runs_stop_sequence() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeClient::new());
    client.push_schedule(Ok(fh_api::ScheduleResponse {
        update_interval_seconds: 15,
        desired_worker_status: Some(fh_core::DesiredWorkerStatus::Stopped),
        ..Default::default()
    }));

    let worker = worker_with(client.clone(), config_in(tmp.path(), &[]));
    worker.run().await.unwrap();

    let targets: Vec<_> = client
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::UpdateWorker { target } => Some(target),
            _ => None,
        })
        .collect();
    assert_eq!(
        targets,
        vec![
            WorkerTargetStatus::Started,
            WorkerTargetStatus::Stopping,
            WorkerTargetStatus::Stopped,
        ]
    );
    assert!(!client.calls().iter().any(|c| matches!(c, Call::DeleteWorker)));
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_on_shutdown_calls_delete_worker() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeClient::new());
    client.push_schedule(Ok(fh_api::ScheduleResponse {
        update_interval_seconds: 15,
        desired_worker_status: Some(fh_core::DesiredWorkerStatus::Stopped),
        ..Default::default()
    }));

    let worker = worker_with(
        client.clone(),
        config_in(tmp.path(), &["--delete-worker-on-shutdown"]),
    );
    worker.run().await.unwrap();

    assert!(client.calls().iter().any(|c| matches!(c, Call::DeleteWorker)));
}

#[tokio::test(flavor = "multi_thread")]
async fn local_drain_request_stops_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeClient::new());
    // Idle defaults keep the loop polling until the drain fires.

    let worker = worker_with(client.clone(), config_in(tmp.path(), &[]));
    let drain = worker.drain_state();

    let run = tokio::spawn(worker.run());
    // Let the loop reach steady state, then drain.
    tokio::time::sleep(Duration::from_millis(200)).await;
    drain.request(DrainRequest::expedited("test"));
    run.await.unwrap().unwrap();

    let calls = client.calls();
    assert!(calls
        .iter()
        .any(|c| matches!(c, Call::UpdateWorker { target: WorkerTargetStatus::Stopped })));
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_worker_rebootstraps_when_allowed() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeClient::new());
    // First schedule call reports the worker offline; after re-bootstrap the
    // service directs a stop.
    client.push_schedule(Err(fh_api::ServiceError::conflict(
        fh_api::ConflictReason::StatusConflict,
        "worker-fake",
        None,
    )));
    client.push_schedule(Ok(fh_api::ScheduleResponse {
        update_interval_seconds: 15,
        desired_worker_status: Some(fh_core::DesiredWorkerStatus::Stopped),
        ..Default::default()
    }));

    let worker = worker_with(client.clone(), config_in(tmp.path(), &[]));
    worker.run().await.unwrap();

    // STARTED was set twice: once per startup workflow.
    let starts = client
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::UpdateWorker { target: WorkerTargetStatus::Started }))
        .count();
    assert_eq!(starts, 2);
}
