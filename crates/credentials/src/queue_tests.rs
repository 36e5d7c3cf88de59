// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fh_api::test_support::{credentials, worker_ids, FakeClient};
use fh_core::SystemClock;
use std::time::Duration;

struct Fixture {
    manager: QueueCredentialsManager<SystemClock>,
    client: Arc<FakeClient>,
    failure_rx: mpsc::UnboundedReceiver<QueueCredentialsFailure>,
    _tmp: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(FakeClient::new());
    let (failure_tx, failure_rx) = mpsc::unbounded_channel();
    let manager = QueueCredentialsManager::new(
        client.clone() as Arc<dyn ServiceClient>,
        worker_ids(),
        tmp.path().to_path_buf(),
        SystemClock,
        failure_tx,
    );
    Fixture { manager, client, failure_rx, _tmp: tmp }
}

#[tokio::test]
async fn acquire_installs_files_and_release_purges() {
    let mut fx = fixture();
    let queue_id = QueueId::new("queue-1");
    let interrupt = CancellationToken::new();

    let env = fx.manager.acquire(&queue_id, &interrupt).await.unwrap().unwrap();
    assert!(env.env.iter().any(|(k, _)| k == "AWS_CONFIG_FILE"));

    let paths = QueueCredentialsPaths::new(fx._tmp.path(), &queue_id);
    assert!(paths.credentials_json.exists());

    fx.manager.release(&queue_id).await;
    assert!(!paths.dir.exists());
    assert!(fx.manager.active_queues().is_empty());
    assert!(fx.failure_rx.try_recv().is_err());
}

#[tokio::test]
async fn refcount_spans_sessions_on_the_same_queue() {
    let fx = fixture();
    let queue_id = QueueId::new("queue-1");
    let interrupt = CancellationToken::new();

    fx.manager.acquire(&queue_id, &interrupt).await.unwrap();
    fx.manager.acquire(&queue_id, &interrupt).await.unwrap();

    // One AssumeQueueRoleForWorker call despite two sessions.
    let assume_calls = fx
        .client
        .calls()
        .into_iter()
        .filter(|c| matches!(c, fh_api::test_support::Call::AssumeQueueRole { .. }))
        .count();
    assert_eq!(assume_calls, 1);

    let paths = QueueCredentialsPaths::new(fx._tmp.path(), &queue_id);
    fx.manager.release(&queue_id).await;
    assert!(paths.dir.exists(), "first release keeps the files");
    fx.manager.release(&queue_id).await;
    assert!(!paths.dir.exists(), "last release purges");
}

#[tokio::test]
async fn queue_without_role_yields_no_credentials() {
    let fx = fixture();
    let queue_id = QueueId::new("queue-1");
    fx.client.push_assume_queue_role(Ok(None));

    let interrupt = CancellationToken::new();
    let env = fx.manager.acquire(&queue_id, &interrupt).await.unwrap();
    assert!(env.is_none());
    assert!(fx.manager.active_queues().is_empty());
}

#[tokio::test]
async fn acquire_failure_surfaces_request_error() {
    let fx = fixture();
    let queue_id = QueueId::new("queue-1");
    fx.client.push_assume_queue_role(Err(fh_api::ServiceError::NotFound {
        resource_id: "queue-1".into(),
    }));

    let interrupt = CancellationToken::new();
    let err = fx.manager.acquire(&queue_id, &interrupt).await.unwrap_err();
    assert!(matches!(err, CredentialsError::Request(_)));
}

#[tokio::test(start_paused = true)]
async fn refresher_failure_reports_queue() {
    let mut fx = fixture();
    let queue_id = QueueId::new("queue-1");

    // Initial acquire succeeds with a short-lived set; the refresh attempt
    // is denied.
    fx.client.push_assume_queue_role(Ok(Some(credentials(Duration::from_secs(60)))));
    fx.client.push_assume_queue_role(Err(fh_api::ServiceError::AccessDenied {
        message: "role detached".into(),
    }));

    let interrupt = CancellationToken::new();
    fx.manager.acquire(&queue_id, &interrupt).await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    let failure = fx.failure_rx.recv().await.unwrap();
    assert_eq!(failure.queue_id, queue_id);
    assert!(failure.message.contains("refresh"));

    fx.manager.release(&queue_id).await;
}
