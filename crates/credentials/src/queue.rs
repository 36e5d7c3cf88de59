// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-queue temporary credentials, reference-counted by active sessions.
//!
//! The first session for a queue fetches credentials, installs the on-disk
//! file set, and starts a refresher task. Later sessions for the same queue
//! bump the refcount. When the last session ends the refresher stops and
//! the material is purged from memory and disk.

use crate::files::{
    install_queue_credentials, remove_queue_credentials, subprocess_env, update_queue_credentials,
    QueueCredentialsPaths,
};
use crate::{agent::refresh_delay, CredentialsError};
use fh_api::{AwsCredentialsData, RequestError, ServiceClient, WorkerIds};
use fh_core::event::{CredsOp, EVENT_TARGET};
use fh_core::{Clock, QueueId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Environment a session hands to its subprocesses so their SDK reads the
/// queue credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueCredentialsEnv {
    pub queue_id: QueueId,
    pub env: Vec<(String, String)>,
}

/// Sent when a queue's refresher hits a terminal error. The scheduler stops
/// the affected sessions with the message.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueCredentialsFailure {
    pub queue_id: QueueId,
    pub message: String,
}

struct QueueEntry {
    refcount: usize,
    paths: QueueCredentialsPaths,
    stop: CancellationToken,
    refresher: JoinHandle<()>,
}

/// Owner of every active queue credential set.
pub struct QueueCredentialsManager<C: Clock> {
    client: Arc<dyn ServiceClient>,
    ids: WorkerIds,
    persistence_dir: PathBuf,
    clock: C,
    failure_tx: mpsc::UnboundedSender<QueueCredentialsFailure>,
    entries: Mutex<HashMap<QueueId, QueueEntry>>,
}

impl<C: Clock> QueueCredentialsManager<C> {
    pub fn new(
        client: Arc<dyn ServiceClient>,
        ids: WorkerIds,
        persistence_dir: PathBuf,
        clock: C,
        failure_tx: mpsc::UnboundedSender<QueueCredentialsFailure>,
    ) -> Self {
        Self {
            client,
            ids,
            persistence_dir,
            clock,
            failure_tx,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire credentials for a session starting on `queue_id`.
    ///
    /// Returns `None` when the queue has no role to assume; the session then
    /// runs without credentials. Only the scheduler task calls this, so two
    /// concurrent acquisitions for the same queue cannot race.
    pub async fn acquire(
        &self,
        queue_id: &QueueId,
        interrupt: &CancellationToken,
    ) -> Result<Option<QueueCredentialsEnv>, CredentialsError> {
        if let Some(entry) = self.entries.lock().get_mut(queue_id) {
            entry.refcount += 1;
            return Ok(Some(QueueCredentialsEnv {
                queue_id: queue_id.clone(),
                env: subprocess_env(&entry.paths, queue_id),
            }));
        }

        let fetched = fh_api::retry::assume_queue_role_for_worker(
            &*self.client,
            &self.ids,
            queue_id,
            interrupt,
        )
        .await?;
        let Some(credentials) = fetched else {
            tracing::warn!(
                target: EVENT_TARGET,
                kind = "AwsCreds",
                op = %CredsOp::Query,
                resource = %queue_id,
                "queue has no role; sessions run without credentials"
            );
            return Ok(None);
        };

        let paths = QueueCredentialsPaths::new(&self.persistence_dir, queue_id);
        install_queue_credentials(&paths, queue_id, &credentials)?;
        tracing::info!(
            target: EVENT_TARGET,
            kind = "AwsCreds",
            op = %CredsOp::Install,
            resource = %queue_id,
            expiry = %credentials.expiration,
            "queue credentials installed"
        );

        let stop = CancellationToken::new();
        let refresher = tokio::spawn(run_queue_refresher(
            self.client.clone(),
            self.ids.clone(),
            queue_id.clone(),
            paths.clone(),
            credentials,
            self.clock.clone(),
            stop.clone(),
            self.failure_tx.clone(),
        ));

        let env = subprocess_env(&paths, queue_id);
        self.entries.lock().insert(
            queue_id.clone(),
            QueueEntry { refcount: 1, paths, stop, refresher },
        );
        Ok(Some(QueueCredentialsEnv { queue_id: queue_id.clone(), env }))
    }

    /// Release one session's hold on a queue's credentials, purging them
    /// when it was the last.
    pub async fn release(&self, queue_id: &QueueId) {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get_mut(queue_id) {
                Some(entry) => {
                    entry.refcount -= 1;
                    if entry.refcount == 0 {
                        entries.remove(queue_id)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(entry) = removed {
            self.purge_entry(queue_id, entry).await;
        }
    }

    /// Purge every queue's credentials. Used during drain.
    pub async fn purge_all(&self) {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (queue_id, entry) in drained {
            self.purge_entry(&queue_id, entry).await;
        }
    }

    /// Queues that currently hold credentials.
    pub fn active_queues(&self) -> Vec<QueueId> {
        self.entries.lock().keys().cloned().collect()
    }

    async fn purge_entry(&self, queue_id: &QueueId, entry: QueueEntry) {
        entry.stop.cancel();
        let _ = entry.refresher.await;
        if let Err(e) = remove_queue_credentials(&entry.paths) {
            tracing::warn!(queue_id = %queue_id, error = %e, "failed to remove queue credentials");
        }
        tracing::info!(
            target: EVENT_TARGET,
            kind = "AwsCreds",
            op = %CredsOp::Delete,
            resource = %queue_id,
            "queue credentials purged"
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_queue_refresher<C: Clock>(
    client: Arc<dyn ServiceClient>,
    ids: WorkerIds,
    queue_id: QueueId,
    paths: QueueCredentialsPaths,
    initial: AwsCredentialsData,
    clock: C,
    stop: CancellationToken,
    failure_tx: mpsc::UnboundedSender<QueueCredentialsFailure>,
) {
    let mut expiration = initial.expiration;
    loop {
        let delay = refresh_delay(clock.now_utc(), expiration);
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match fh_api::retry::assume_queue_role_for_worker(&*client, &ids, &queue_id, &stop).await {
            Ok(Some(new)) => {
                expiration = new.expiration;
                if let Err(e) = update_queue_credentials(&paths, &new) {
                    tracing::warn!(
                        queue_id = %queue_id,
                        error = %e,
                        "failed to rewrite queue credentials file"
                    );
                    continue;
                }
                tracing::info!(
                    target: EVENT_TARGET,
                    kind = "AwsCreds",
                    op = %CredsOp::Refresh,
                    resource = %queue_id,
                    expiry = %new.expiration,
                    "queue credentials refreshed"
                );
            }
            Ok(None) => {
                // The queue's role was detached mid-session.
                let _ = failure_tx.send(QueueCredentialsFailure {
                    queue_id: queue_id.clone(),
                    message: "queue role was removed while sessions were active".into(),
                });
                return;
            }
            Err(RequestError::Interrupted) => return,
            Err(error) => {
                tracing::error!(
                    target: EVENT_TARGET,
                    kind = "AwsCreds",
                    op = %CredsOp::Refresh,
                    resource = %queue_id,
                    error = %error,
                    "fatal error refreshing queue credentials"
                );
                let _ = failure_tx.send(QueueCredentialsFailure {
                    queue_id: queue_id.clone(),
                    message: format!("failed to refresh queue credentials: {error}"),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
