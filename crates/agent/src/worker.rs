// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The top-level worker: bootstrap, credential refresh, scheduling, drain.
//!
//! The embedding binary constructs a [`Worker`] with the concrete transport
//! client and sandbox runner and calls [`Worker::run`], which blocks until
//! the agent has drained or hit a fatal error.

use crate::bootstrap::{bootstrap_worker, BootstrapError};
use crate::config::AgentConfig;
use crate::drain::{DrainRequest, DrainState};
use crate::scheduler::{Scheduler, SchedulerExit};
use crate::signals::{spawn_signal_handlers, spawn_termination_monitor, TerminationMonitor};
use crate::AgentError;
use fh_api::ServiceClient;
use fh_core::event::{WorkerOp, EVENT_TARGET};
use fh_core::{Clock, WorkerStatus};
use fh_credentials::{run_agent_refresher, RefreshFailure};
use fh_sessions::ActionRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Budget for the optional DeleteWorker call after a clean shutdown.
const DELETE_WORKER_BUDGET: Duration = Duration::from_secs(15);

pub struct Worker<R: ActionRunner, C: Clock> {
    client: Arc<dyn ServiceClient>,
    runner: Arc<R>,
    clock: C,
    config: Arc<AgentConfig>,
    drain: DrainState,
}

impl<R: ActionRunner, C: Clock> Worker<R, C> {
    pub fn new(client: Arc<dyn ServiceClient>, runner: Arc<R>, clock: C, config: AgentConfig) -> Self {
        Self {
            client,
            runner,
            clock,
            config: Arc::new(config),
            drain: DrainState::new(),
        }
    }

    /// The drain state, for wiring extra triggers (tests, embedders).
    pub fn drain_state(&self) -> DrainState {
        self.drain.clone()
    }

    /// Run the agent with a host-termination monitor.
    pub async fn run_with_monitor<M: TerminationMonitor>(
        self,
        monitor: M,
    ) -> Result<(), AgentError> {
        spawn_termination_monitor(monitor, self.drain.clone());
        self.run().await
    }

    /// Run the agent until drained or failed.
    pub async fn run(self) -> Result<(), AgentError> {
        spawn_signal_handlers(self.drain.clone());
        let mut lifecycle = WorkerStatus::Created;

        loop {
            note_status(&mut lifecycle, WorkerStatus::Starting);
            let boot = match bootstrap_worker(&*self.client, &self.config, self.drain.token()).await
            {
                Ok(boot) => boot,
                Err(BootstrapError::Interrupted) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            note_status(&mut lifecycle, WorkerStatus::Started);

            // Agent-credentials refresher; a terminal refresh failure turns
            // into a drain.
            let refresher_stop = CancellationToken::new();
            let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<RefreshFailure>();
            let refresher = tokio::spawn(run_agent_refresher(
                self.client.clone(),
                boot.ids.clone(),
                boot.credentials.clone(),
                self.config.agent_credentials_path(),
                self.clock.clone(),
                refresher_stop.clone(),
                failure_tx,
            ));
            let failure_drain = self.drain.clone();
            let failure_watch = tokio::spawn(async move {
                if let Some(failure) = failure_rx.recv().await {
                    let (grace, reason) = match failure {
                        RefreshFailure::Expired { expiry } => (
                            Duration::from_secs(5),
                            format!("agent credentials expired at {expiry}"),
                        ),
                        RefreshFailure::Fatal { message } => (
                            Duration::from_secs(30),
                            format!("fatal error refreshing agent credentials: {message}"),
                        ),
                    };
                    failure_drain.request(DrainRequest::regular(Some(grace), reason));
                }
            });

            let mut scheduler = Scheduler::new(
                self.client.clone(),
                boot.ids.clone(),
                self.config.clone(),
                self.runner.clone(),
                self.clock.clone(),
                self.drain.clone(),
            );
            let exit = scheduler.run().await;

            refresher_stop.cancel();
            let _ = refresher.await;
            failure_watch.abort();

            match exit {
                SchedulerExit::Drain => {
                    let request = self
                        .drain
                        .current()
                        .unwrap_or_else(|| DrainRequest::expedited("drain state lost"));
                    note_status(&mut lifecycle, WorkerStatus::Stopping);
                    scheduler.drain(request).await;
                    note_status(&mut lifecycle, WorkerStatus::Stopped);
                    if self.maybe_delete_worker(&boot.ids).await {
                        note_status(&mut lifecycle, WorkerStatus::Deleted);
                    }
                    return Ok(());
                }
                SchedulerExit::ServiceStop => {
                    note_status(&mut lifecycle, WorkerStatus::Stopping);
                    scheduler.service_stop().await;
                    note_status(&mut lifecycle, WorkerStatus::Stopped);
                    if self.maybe_delete_worker(&boot.ids).await {
                        note_status(&mut lifecycle, WorkerStatus::Deleted);
                    }
                    return Ok(());
                }
                SchedulerExit::WorkerOffline => {
                    scheduler.abandon().await;
                    if self.config.restart_on_offline {
                        tracing::info!("re-running the startup workflow");
                        continue;
                    }
                    return Err(AgentError::WorkerDeregistered);
                }
                SchedulerExit::Fatal(error) => {
                    scheduler.abandon().await;
                    return Err(error.into());
                }
            }
        }
    }

    /// Returns true when the worker was deleted from the service.
    async fn maybe_delete_worker(&self, ids: &fh_api::WorkerIds) -> bool {
        if !self.config.delete_worker_on_shutdown {
            return false;
        }
        let token = CancellationToken::new();
        match tokio::time::timeout(
            DELETE_WORKER_BUDGET,
            fh_api::retry::delete_worker(&*self.client, ids, &token),
        )
        .await
        {
            Ok(Ok(())) => {
                tracing::info!(
                    target: EVENT_TARGET,
                    kind = "Worker",
                    op = %WorkerOp::Delete,
                    worker_id = %ids.worker_id,
                    "worker deleted"
                );
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "DeleteWorker failed");
                false
            }
            Err(_) => {
                tracing::warn!("DeleteWorker timed out");
                false
            }
        }
    }
}

fn note_status(previous: &mut WorkerStatus, next: WorkerStatus) {
    tracing::info!(
        target: EVENT_TARGET,
        kind = "Worker",
        op = %WorkerOp::Status,
        from = %previous,
        to = %next,
        "lifecycle transition"
    );
    *previous = next;
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
