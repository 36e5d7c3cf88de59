// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The main scheduling loop.
//!
//! One task. Each iteration reports pending action updates through
//! UpdateWorkerSchedule, diffs the returned assignments against local
//! sessions, then sleeps until the poll interval elapses, a terminal
//! failure or idle session wakes it, or a drain begins.

use crate::config::AgentConfig;
use crate::drain::{DrainKind, DrainRequest, DrainState, MIN_REGULAR_DRAIN_BUDGET};
use crate::updates::PendingUpdates;
use fh_api::{
    AssignedAction, AssignedSession, JobDetailsData, PosixUser, RequestError, RunAs,
    ScheduleResponse, ServiceClient, WorkerIds,
};
use fh_core::event::{SessionOp, WorkerOp, EVENT_TARGET};
use fh_core::{
    ActionId, Clock, DesiredWorkerStatus, QueueId, SessionId, WorkerTargetStatus,
};
use fh_credentials::{QueueCredentialsFailure, QueueCredentialsManager};
use fh_sessions::{
    ActionRunner, JobEntities, SessionConfig, SessionHandle, SessionRuntime, StatusSink,
    StopOutcome,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Poll interval until the first successful response supplies one.
const INITIAL_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// How long session tasks get to flush their statuses in an expedited
/// drain before the agent reports and exits anyway.
const EXPEDITED_FLUSH_BUDGET: Duration = Duration::from_secs(2);

/// Budget for one UpdateWorker/UpdateWorkerSchedule call during teardown.
const DRAIN_CALL_BUDGET: Duration = Duration::from_secs(15);

/// Why the scheduling loop unwound.
#[derive(Debug)]
pub enum SchedulerExit {
    /// A local drain request is pending; run the drain workflow.
    Drain,
    /// The service directed a stop and assignments are clear.
    ServiceStop,
    /// The service no longer considers this worker online or registered.
    WorkerOffline,
    /// Unrecoverable service failure.
    Fatal(RequestError),
}

struct SessionEntry {
    handle: SessionHandle,
    queue_id: QueueId,
    has_queue_credentials: bool,
}

pub struct Scheduler<R: ActionRunner, C: Clock> {
    client: Arc<dyn ServiceClient>,
    ids: WorkerIds,
    config: Arc<AgentConfig>,
    runner: Arc<R>,
    clock: C,
    updates: Arc<PendingUpdates>,
    drain: DrainState,
    queue_credentials: Arc<QueueCredentialsManager<C>>,
    creds_failure_rx: mpsc::UnboundedReceiver<QueueCredentialsFailure>,
    sessions: HashMap<SessionId, SessionEntry>,
}

impl<R: ActionRunner, C: Clock> Scheduler<R, C> {
    pub fn new(
        client: Arc<dyn ServiceClient>,
        ids: WorkerIds,
        config: Arc<AgentConfig>,
        runner: Arc<R>,
        clock: C,
        drain: DrainState,
    ) -> Self {
        let (creds_failure_tx, creds_failure_rx) = mpsc::unbounded_channel();
        let queue_credentials = Arc::new(QueueCredentialsManager::new(
            client.clone(),
            ids.clone(),
            config.persistence_dir.clone(),
            clock.clone(),
            creds_failure_tx,
        ));
        Self {
            client,
            ids,
            config,
            runner,
            clock,
            updates: Arc::new(PendingUpdates::new()),
            drain,
            queue_credentials,
            creds_failure_rx,
            sessions: HashMap::new(),
        }
    }

    /// Run the loop until a drain, a service stop, or a fatal error.
    pub async fn run(&mut self) -> SchedulerExit {
        let mut interval = INITIAL_POLL_INTERVAL;
        loop {
            if self.drain.is_requested() {
                return SchedulerExit::Drain;
            }

            let (payload, tx) = self.updates.snapshot();
            let response = match fh_api::retry::update_worker_schedule(
                &*self.client,
                &self.ids,
                &payload,
                self.drain.token(),
            )
            .await
            {
                Ok(response) => {
                    self.updates.commit(tx);
                    response
                }
                Err(RequestError::Interrupted) => continue,
                Err(RequestError::WorkerOffline(e)) => {
                    tracing::warn!(
                        target: EVENT_TARGET,
                        kind = "Worker",
                        op = %WorkerOp::Status,
                        error = %e,
                        "service no longer considers this worker started"
                    );
                    return SchedulerExit::WorkerOffline;
                }
                Err(RequestError::WorkerNotFound(e)) => {
                    tracing::warn!(error = %e, "worker not found; returning to startup");
                    return SchedulerExit::WorkerOffline;
                }
                Err(error) => return SchedulerExit::Fatal(error),
            };

            interval = response.update_interval();
            if let Some(exit) = self.apply(response).await {
                return exit;
            }

            let failure = tokio::select! {
                _ = tokio::time::sleep(interval) => None,
                _ = self.updates.notified() => None,
                _ = self.drain.token().cancelled() => None,
                failure = self.creds_failure_rx.recv() => failure,
            };
            if let Some(failure) = failure {
                self.handle_queue_credentials_failure(failure);
            }
        }
    }

    /// Diff a schedule response against local state. Cancels are routed
    /// before any session teardown.
    async fn apply(&mut self, response: ScheduleResponse) -> Option<SchedulerExit> {
        // 1. Route cancels. Cancels for actions that already reported a
        //    terminal status are dropped (idempotent cancel).
        for (session_id, action_ids) in &response.cancel_session_actions {
            if let Some(entry) = self.sessions.get(session_id) {
                let live: Vec<ActionId> = action_ids
                    .iter()
                    .filter(|id| !self.updates.contains_terminal(id))
                    .cloned()
                    .collect();
                if !live.is_empty() {
                    entry.handle.cancel_actions(live);
                }
            }
        }

        // 2. Tear down sessions the service no longer lists.
        let finished: Vec<SessionId> = self
            .sessions
            .keys()
            .filter(|id| !response.assigned_sessions.contains_key(*id))
            .cloned()
            .collect();
        for session_id in finished {
            if let Some(entry) = self.sessions.remove(&session_id) {
                self.teardown_session(&session_id, entry).await;
            }
        }

        // 3. Start newly assigned sessions.
        let new_ids: Vec<SessionId> = response
            .assigned_sessions
            .keys()
            .filter(|id| !self.sessions.contains_key(*id))
            .cloned()
            .collect();
        for session_id in &new_ids {
            if let Some(assigned) = response.assigned_sessions.get(session_id) {
                self.create_session(session_id, assigned).await;
            }
        }

        // 4. Update existing sessions' queues.
        for (session_id, assigned) in &response.assigned_sessions {
            if new_ids.contains(session_id) {
                continue;
            }
            let Some(entry) = self.sessions.get(session_id) else { continue };
            let actions: Vec<AssignedAction> = assigned
                .actions
                .iter()
                .filter(|a| !self.updates.contains_terminal(&a.action_id))
                .cloned()
                .collect();
            if entry.handle.is_finished() || !entry.handle.replace_actions(actions) {
                // The session task died; return its actions per contract.
                self.updates.reconcile_stopped_session(
                    &assigned.actions,
                    "Session has previously been stopped",
                    self.clock.now_utc(),
                );
            }
        }

        // 5. Service-directed stop.
        if response.desired_worker_status == Some(DesiredWorkerStatus::Stopped) {
            if !response.assigned_sessions.is_empty() {
                tracing::error!(
                    "protocol violation: desired status STOPPED with non-empty assignments; \
                     ignoring until assignments clear"
                );
            } else {
                tracing::warn!("service requested worker stop");
                return Some(SchedulerExit::ServiceStop);
            }
        }
        None
    }

    async fn teardown_session(&self, session_id: &SessionId, entry: SessionEntry) {
        entry.handle.stop(
            StopOutcome::Interrupted,
            Some(self.config.cancel_grace()),
            None,
            false,
        );
        // Teardown is quick: the service only removes a session once it has
        // acknowledged every action update, so no action is running.
        entry.handle.wait().await;
        if entry.has_queue_credentials {
            self.queue_credentials.release(&entry.queue_id).await;
        }
        tracing::info!(
            target: EVENT_TARGET,
            kind = "Session",
            op = %SessionOp::Complete,
            session_id = %session_id,
            queue_id = %entry.queue_id,
            "session torn down"
        );
    }

    async fn create_session(&mut self, session_id: &SessionId, assigned: &AssignedSession) {
        let now = self.clock.now_utc();
        tracing::info!(
            target: EVENT_TARGET,
            kind = "Session",
            op = %SessionOp::Starting,
            session_id = %session_id,
            queue_id = %assigned.queue_id,
            job_id = %assigned.job_id,
            "starting new session"
        );

        // The service guarantees one queue at a time per worker; a second
        // queue while the first still has sessions is a protocol violation.
        if let Some(other) = self.sessions.values().find(|e| e.queue_id != assigned.queue_id) {
            tracing::error!(
                session_queue = %assigned.queue_id,
                active_queue = %other.queue_id,
                "protocol violation: session assigned for a second queue"
            );
            self.updates.fail_all_actions(
                &assigned.actions,
                "Worker already has sessions for a different queue",
                now,
            );
            return;
        }

        let entities = Arc::new(JobEntities::new(
            self.client.clone(),
            self.ids.clone(),
            assigned.job_id.clone(),
        ));

        // jobDetails gates session setup: without it nothing can run.
        let job_details = match entities.job_details(self.drain.token()).await {
            Ok(details) => details,
            Err(error) => {
                self.fail_session_setup(
                    session_id,
                    assigned,
                    &format!("Failed to obtain job details: {error}"),
                );
                return;
            }
        };

        if !fh_api::is_supported_schema(&job_details.schema_version) {
            self.fail_session_setup(
                session_id,
                assigned,
                &format!(
                    "Unsupported job description schema version {}",
                    job_details.schema_version
                ),
            );
            return;
        }

        let os_user = match self.resolve_user(&job_details) {
            Ok(user) => user,
            Err(message) => {
                self.fail_session_setup(session_id, assigned, &message);
                return;
            }
        };

        let mut env = self.session_env(session_id, assigned);
        let mut has_queue_credentials = false;
        if job_details.queue_role_arn.is_some() {
            match self
                .queue_credentials
                .acquire(&assigned.queue_id, self.drain.token())
                .await
            {
                Ok(Some(queue_env)) => {
                    env.extend(queue_env.env);
                    has_queue_credentials = true;
                    tracing::info!(
                        target: EVENT_TARGET,
                        kind = "Session",
                        op = %SessionOp::Creds,
                        session_id = %session_id,
                        queue_id = %assigned.queue_id,
                        "queue credentials are available"
                    );
                }
                Ok(None) => {
                    tracing::warn!(
                        target: EVENT_TARGET,
                        kind = "Session",
                        op = %SessionOp::Creds,
                        session_id = %session_id,
                        queue_id = %assigned.queue_id,
                        "queue credentials are not available; running without"
                    );
                }
                Err(error) => {
                    self.fail_session_setup(
                        session_id,
                        assigned,
                        &format!("Error obtaining credentials for the queue role: {error}"),
                    );
                    return;
                }
            }
        } else {
            tracing::warn!(
                target: EVENT_TARGET,
                kind = "Session",
                op = %SessionOp::Creds,
                session_id = %session_id,
                queue_id = %assigned.queue_id,
                "queue has no role; running without credentials"
            );
        }

        // Job attachments without credentials cannot work; fail fast with a
        // clear reason instead of letting downloads die obscurely.
        if job_details.job_attachment_settings.is_some() && !has_queue_credentials {
            let message = if job_details.queue_role_arn.is_some() {
                "Job attachments are configured on the queue, but queue credentials are not available"
            } else {
                "Misconfiguration: job attachments are configured on the queue, but the queue has no role"
            };
            self.fail_session_setup(session_id, assigned, message);
            return;
        }

        let log_file = match self.provision_log_file(&assigned.queue_id, session_id) {
            Ok(path) => path,
            Err(message) => {
                if has_queue_credentials {
                    self.queue_credentials.release(&assigned.queue_id).await;
                }
                self.fail_session_setup(session_id, assigned, &message);
                return;
            }
        };

        let session_config = SessionConfig {
            session_id: session_id.clone(),
            queue_id: assigned.queue_id.clone(),
            job_id: assigned.job_id.clone(),
            os_user,
            env,
            working_dir: self.config.sessions_dir.join(session_id.as_str()),
            log_file,
            retain_working_dir: self.config.retain_session_dir,
            cancel_grace: self.config.cancel_grace(),
        };
        let handle = SessionRuntime::spawn(
            session_config,
            assigned.actions.clone(),
            entities,
            self.runner.clone(),
            self.clock.clone(),
            self.updates.clone() as Arc<dyn StatusSink>,
        );
        self.sessions.insert(
            session_id.clone(),
            SessionEntry { handle, queue_id: assigned.queue_id.clone(), has_queue_credentials },
        );
    }

    fn fail_session_setup(
        &self,
        session_id: &SessionId,
        assigned: &AssignedSession,
        message: &str,
    ) {
        tracing::error!(
            target: EVENT_TARGET,
            kind = "Session",
            op = %SessionOp::Failed,
            session_id = %session_id,
            queue_id = %assigned.queue_id,
            job_id = %assigned.job_id,
            message,
            "failed to start session"
        );
        self.updates.fail_all_actions(&assigned.actions, message, self.clock.now_utc());
    }

    /// Determine the OS user session subprocesses run as.
    fn resolve_user(&self, job_details: &JobDetailsData) -> Result<Option<PosixUser>, String> {
        if self.config.run_as_agent {
            return Ok(None);
        }
        if let Some(user) = &self.config.job_user {
            return Ok(Some(user.clone()));
        }
        match &job_details.job_run_as_user {
            None => Err("Queue does not define a job-run-as user".into()),
            Some(job_user) => match job_user.run_as {
                RunAs::WorkerAgentUser => {
                    tracing::warn!(
                        "running session actions as the agent's own user; this configuration \
                         is not recommended"
                    );
                    Ok(None)
                }
                RunAs::QueueConfiguredUser => job_user.posix.clone().map(Some).ok_or_else(|| {
                    "Queue's job-run-as user does not define a posix user for this platform"
                        .to_string()
                }),
            },
        }
    }

    fn session_env(&self, session_id: &SessionId, assigned: &AssignedSession) -> Vec<(String, String)> {
        vec![
            ("FARMHAND_FARM_ID".into(), self.ids.farm_id.to_string()),
            ("FARMHAND_FLEET_ID".into(), self.ids.fleet_id.to_string()),
            ("FARMHAND_WORKER_ID".into(), self.ids.worker_id.to_string()),
            ("FARMHAND_QUEUE_ID".into(), assigned.queue_id.to_string()),
            ("FARMHAND_JOB_ID".into(), assigned.job_id.to_string()),
            ("FARMHAND_SESSION_ID".into(), session_id.to_string()),
        ]
    }

    /// Create the per-session log file path, including its queue directory.
    fn provision_log_file(
        &self,
        queue_id: &QueueId,
        session_id: &SessionId,
    ) -> Result<PathBuf, String> {
        let Some(logs_dir) = &self.config.logs_dir else {
            return Ok(self.config.sessions_dir.join(session_id.as_str()).join("session.log"));
        };
        let queue_dir = logs_dir.join(queue_id.as_str());
        std::fs::create_dir_all(&queue_dir).map_err(|e| {
            format!("Failed to create session log directory {}: {e}", queue_dir.display())
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&queue_dir, std::fs::Permissions::from_mode(0o700));
        }
        Ok(queue_dir.join(format!("{session_id}.log")))
    }

    fn handle_queue_credentials_failure(&mut self, failure: QueueCredentialsFailure) {
        tracing::error!(
            queue_id = %failure.queue_id,
            message = %failure.message,
            "queue credentials failed; stopping affected sessions"
        );
        for entry in self.sessions.values() {
            if entry.queue_id == failure.queue_id {
                entry.handle.stop(
                    StopOutcome::Failed,
                    Some(self.config.cancel_grace()),
                    Some(failure.message.clone()),
                    false,
                );
            }
        }
    }

    /// Run the worker-initiated drain workflow and consume the scheduler.
    pub async fn drain(mut self, request: DrainRequest) {
        let grace = request.grace.unwrap_or(self.config.drain_grace());
        let kind = if request.kind == DrainKind::Regular && grace < MIN_REGULAR_DRAIN_BUDGET {
            tracing::warn!(
                grace_s = grace.as_secs(),
                "drain budget too small for a regular drain; switching to expedited"
            );
            DrainKind::Expedited
        } else {
            request.kind
        };
        let deadline = Instant::now() + grace;

        // Tell the service to stop assigning work. Bounded and best-effort:
        // the drain proceeds whether or not this lands.
        let stopping_budget = match kind {
            DrainKind::Regular => Duration::from_secs(5).min(grace / 10),
            DrainKind::Expedited => Duration::from_secs(1),
        };
        self.update_worker_bounded(WorkerTargetStatus::Stopping, stopping_budget).await;

        match kind {
            DrainKind::Expedited => {
                for entry in self.sessions.values() {
                    entry.handle.stop(
                        StopOutcome::Interrupted,
                        None,
                        Some(request.reason.clone()),
                        true,
                    );
                }
                for (_, entry) in self.sessions.drain() {
                    let _ = tokio::time::timeout(EXPEDITED_FLUSH_BUDGET, entry.handle.wait()).await;
                }
            }
            DrainKind::Regular => {
                for entry in self.sessions.values() {
                    entry.handle.stop(
                        StopOutcome::Interrupted,
                        Some(grace),
                        Some(request.reason.clone()),
                        false,
                    );
                }
                // Leave a slice of the budget for the final status flush.
                let session_deadline =
                    deadline.checked_sub(Duration::from_secs(1)).unwrap_or(deadline);
                for (_, entry) in self.sessions.drain() {
                    let _ = tokio::time::timeout_at(session_deadline, entry.handle.wait()).await;
                }
            }
        }

        self.queue_credentials.purge_all().await;

        // One last schedule call so every terminal status reaches the
        // service before STOPPED (in the expedited case they all travel in
        // this single batch).
        let (payload, tx) = self.updates.snapshot();
        let flush_token = CancellationToken::new();
        match tokio::time::timeout(
            DRAIN_CALL_BUDGET,
            fh_api::retry::update_worker_schedule(&*self.client, &self.ids, &payload, &flush_token),
        )
        .await
        {
            Ok(Ok(_)) => self.updates.commit(tx),
            Ok(Err(e)) => tracing::warn!(error = %e, "final status flush failed"),
            Err(_) => tracing::warn!("final status flush timed out"),
        }

        self.update_worker_bounded(WorkerTargetStatus::Stopped, DRAIN_CALL_BUDGET).await;
    }

    /// Service-directed stop: assignments are already clear, so only the
    /// STOPPING/STOPPED transitions (and any straggling status updates from
    /// teardown) remain.
    pub async fn service_stop(mut self) {
        debug_assert!(self.sessions.is_empty());
        for (_, entry) in self.sessions.drain() {
            entry.handle.stop(StopOutcome::Interrupted, Some(Duration::ZERO), None, false);
            entry.handle.wait().await;
        }
        self.queue_credentials.purge_all().await;
        self.update_worker_bounded(WorkerTargetStatus::Stopping, DRAIN_CALL_BUDGET).await;
        if !self.updates.is_empty() {
            let (payload, tx) = self.updates.snapshot();
            let flush_token = CancellationToken::new();
            if let Ok(Ok(_)) = tokio::time::timeout(
                DRAIN_CALL_BUDGET,
                fh_api::retry::update_worker_schedule(
                    &*self.client,
                    &self.ids,
                    &payload,
                    &flush_token,
                ),
            )
            .await
            {
                self.updates.commit(tx);
            }
        }
        self.update_worker_bounded(WorkerTargetStatus::Stopped, DRAIN_CALL_BUDGET).await;
    }

    /// Abandon local work without service calls. Used before re-running the
    /// startup workflow once the service already considers us offline.
    pub async fn abandon(mut self) {
        for entry in self.sessions.values() {
            entry.handle.stop(
                StopOutcome::Interrupted,
                None,
                Some("worker is re-registering".into()),
                true,
            );
        }
        for (_, entry) in self.sessions.drain() {
            let _ = tokio::time::timeout(EXPEDITED_FLUSH_BUDGET, entry.handle.wait()).await;
        }
        self.queue_credentials.purge_all().await;
    }

    async fn update_worker_bounded(&self, target: WorkerTargetStatus, budget: Duration) {
        let token = CancellationToken::new();
        match tokio::time::timeout(
            budget,
            fh_api::retry::update_worker(&*self.client, &self.ids, target, &token),
        )
        .await
        {
            Ok(Ok(())) => {
                tracing::info!(
                    target: EVENT_TARGET,
                    kind = "Worker",
                    op = %WorkerOp::Status,
                    worker_id = %self.ids.worker_id,
                    status = %target,
                    "status updated"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(status = %target, error = %e, "status update failed; continuing");
            }
            Err(_) => {
                tracing::warn!(status = %target, "status update timed out; continuing");
            }
        }
    }

    /// Test-facing view of pending updates.
    #[cfg(test)]
    pub(crate) fn updates(&self) -> Arc<PendingUpdates> {
        self.updates.clone()
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
