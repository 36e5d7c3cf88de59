// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-session pipeline task.
//!
//! One task per session. Actions run serially in queue order; the scheduler
//! feeds assignment changes and cancels through a command channel and
//! receives status updates through the [`StatusSink`]. An unsuccessful
//! action marks everything queued behind it NEVER_ATTEMPTED, except
//! environment exits, which always run.

use crate::entities::JobEntities;
use crate::queue::SessionActionQueue;
use crate::runner::{
    ActionContext, ActionDetails, ActionOutcome, ActionRunner, OutcomeState, RunnerError,
    RunningAction,
};
use fh_api::{AssignedAction, PosixUser};
use fh_core::event::{ActionOp, SessionOp, EVENT_TARGET};
use fh_core::{ActionId, ActionKind, ActionUpdate, Clock, CompletedStatus, JobId, QueueId, SessionId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Minimum grace handed to the runner during an expedited stop.
const MIN_CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Where session runtimes report status updates.
pub trait StatusSink: Send + Sync + 'static {
    fn report(&self, session_id: &SessionId, update: ActionUpdate);
    /// The session has no running and no queued actions.
    fn session_idle(&self, session_id: &SessionId);
}

/// Terminal status to report for an action interrupted by a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Failed,
    Interrupted,
}

impl StopOutcome {
    fn completed_status(self) -> CompletedStatus {
        match self {
            StopOutcome::Failed => CompletedStatus::Failed,
            StopOutcome::Interrupted => CompletedStatus::Interrupted,
        }
    }
}

/// Commands from the scheduler to a session runtime.
#[derive(Debug)]
pub enum SessionCommand {
    /// The service's current assignment order for this session.
    ReplaceActions(Vec<AssignedAction>),
    /// Service-initiated cancels.
    CancelActions(Vec<ActionId>),
    /// Quiesce the session. Expedited stops do not wait for the runner.
    Stop {
        outcome: StopOutcome,
        grace: Option<Duration>,
        fail_message: Option<String>,
        expedited: bool,
    },
}

/// Static configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: SessionId,
    pub queue_id: QueueId,
    pub job_id: JobId,
    pub os_user: Option<PosixUser>,
    /// Base subprocess environment: session identity plus (when the queue
    /// has a role) queue-credential file paths. Never agent credentials.
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
    pub log_file: PathBuf,
    pub retain_working_dir: bool,
    /// Grace handed to the runner for ordinary cancels.
    pub cancel_grace: Duration,
}

/// Scheduler-side handle to a running session task.
pub struct SessionHandle {
    pub session_id: SessionId,
    pub queue_id: QueueId,
    pub job_id: JobId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Returns false if the session task already exited.
    pub fn replace_actions(&self, actions: Vec<AssignedAction>) -> bool {
        self.commands.send(SessionCommand::ReplaceActions(actions)).is_ok()
    }

    pub fn cancel_actions(&self, action_ids: Vec<ActionId>) -> bool {
        self.commands.send(SessionCommand::CancelActions(action_ids)).is_ok()
    }

    pub fn stop(
        &self,
        outcome: StopOutcome,
        grace: Option<Duration>,
        fail_message: Option<String>,
        expedited: bool,
    ) -> bool {
        self.commands
            .send(SessionCommand::Stop { outcome, grace, fail_message, expedited })
            .is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session task to exit.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

struct StopState {
    outcome: StopOutcome,
    grace: Option<Duration>,
    fail_message: Option<String>,
    expedited: bool,
}

enum Flow {
    Continue,
    Stop,
}

/// The session task state.
pub struct SessionRuntime<R: ActionRunner, C: Clock> {
    config: SessionConfig,
    queue: SessionActionQueue,
    entities: Arc<JobEntities>,
    runner: Arc<R>,
    clock: C,
    sink: Arc<dyn StatusSink>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    /// Cancels for actions queued behind the running one. Resolved to
    /// NEVER_ATTEMPTED only after the running action reports its terminal
    /// status, preserving report order.
    pending_cancels: HashSet<ActionId>,
    stop: Option<StopState>,
    interrupt: CancellationToken,
}

impl<R: ActionRunner, C: Clock> SessionRuntime<R, C> {
    /// Spawn the session task and return the scheduler-side handle.
    pub fn spawn(
        config: SessionConfig,
        initial_actions: Vec<AssignedAction>,
        entities: Arc<JobEntities>,
        runner: Arc<R>,
        clock: C,
        sink: Arc<dyn StatusSink>,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut queue = SessionActionQueue::new();
        queue.replace(initial_actions, None);

        let session_id = config.session_id.clone();
        let queue_id = config.queue_id.clone();
        let job_id = config.job_id.clone();
        let runtime = SessionRuntime {
            config,
            queue,
            entities,
            runner,
            clock,
            sink,
            commands: command_rx,
            pending_cancels: HashSet::new(),
            stop: None,
            interrupt: CancellationToken::new(),
        };
        let task = tokio::spawn(runtime.run());
        SessionHandle { session_id, queue_id, job_id, commands: command_tx, task }
    }

    async fn run(mut self) {
        tracing::info!(
            target: EVENT_TARGET,
            kind = "Session",
            op = %SessionOp::Starting,
            session_id = %self.config.session_id,
            queue_id = %self.config.queue_id,
            job_id = %self.config.job_id,
            "starting session"
        );
        self.warm_entity_cache().await;

        'main: while self.stop.is_none() {
            while let Ok(command) = self.commands.try_recv() {
                if matches!(self.handle_command(command, None).await, Flow::Stop) {
                    break 'main;
                }
            }
            if self.stop.is_some() {
                break;
            }

            let Some(action) = self.queue.pop_front() else {
                self.sink.session_idle(&self.config.session_id);
                match self.commands.recv().await {
                    Some(command) => {
                        if matches!(self.handle_command(command, None).await, Flow::Stop) {
                            break 'main;
                        }
                        continue;
                    }
                    None => break 'main,
                }
            };

            self.run_action(action).await;
        }

        self.cleanup().await;
    }

    async fn warm_entity_cache(&mut self) {
        let refs = self.queue.entity_refs(&self.config.job_id);
        if refs.is_empty() {
            return;
        }
        enum Warm {
            Done(Result<(), fh_api::RequestError>),
            Command(Option<SessionCommand>),
        }
        let warm = tokio::select! {
            result = self.entities.cache_entities(refs, &self.interrupt) => Warm::Done(result),
            command = self.commands.recv() => Warm::Command(command),
        };
        match warm {
            Warm::Done(Ok(())) => {}
            Warm::Done(Err(e)) => {
                tracing::info!(
                    target: EVENT_TARGET,
                    kind = "Session",
                    op = %SessionOp::Info,
                    session_id = %self.config.session_id,
                    error = %e,
                    "did not fully warm entity cache; continuing"
                );
            }
            Warm::Command(Some(command)) => {
                let _ = self.handle_command(command, None).await;
            }
            Warm::Command(None) => {}
        }
    }

    /// Handle a command. `running` identifies the in-flight action, if any.
    async fn handle_command(
        &mut self,
        command: SessionCommand,
        running: Option<&ActionId>,
    ) -> Flow {
        match command {
            SessionCommand::ReplaceActions(actions) => {
                self.queue.replace(actions, running);
                Flow::Continue
            }
            SessionCommand::CancelActions(action_ids) => {
                for action_id in action_ids {
                    if Some(&action_id) == running {
                        // Handled by the caller's select loop.
                        continue;
                    }
                    if running.is_some() {
                        // Behind a running action: report only after its
                        // terminal status goes out.
                        self.pending_cancels.insert(action_id);
                    } else if let Some(removed) = self.queue.cancel(&action_id) {
                        // Nothing running ahead of it: canceled outright,
                        // without timestamps since it never started.
                        self.report(ActionUpdate {
                            action_id: removed.action_id,
                            completed_status: Some(CompletedStatus::Canceled),
                            started_at: None,
                            ended_at: None,
                            updated_at: None,
                            progress_percent: None,
                            message: Some("canceled by the service".into()),
                            exit_code: None,
                        });
                    }
                }
                Flow::Continue
            }
            SessionCommand::Stop { outcome, grace, fail_message, expedited } => {
                self.stop = Some(StopState { outcome, grace, fail_message, expedited });
                self.interrupt.cancel();
                Flow::Stop
            }
        }
    }

    async fn run_action(&mut self, action: AssignedAction) {
        let action_id = action.action_id.clone();
        let details = match self.resolve_details(&action).await {
            Ok(details) => details,
            Err(message) => {
                self.fail_before_start(&action, &message);
                return;
            }
        };

        tracing::info!(
            target: EVENT_TARGET,
            kind = "Action",
            op = %ActionOp::Start,
            session_id = %self.config.session_id,
            action_id = %action_id,
            action = %action.kind,
            "action started"
        );
        let started_at = self.clock.now_utc();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let context = ActionContext {
            session_id: self.config.session_id.clone(),
            queue_id: self.config.queue_id.clone(),
            job_id: self.config.job_id.clone(),
            action: action.clone(),
            details,
            os_user: self.config.os_user.clone(),
            env: self.config.env.clone(),
            working_dir: self.config.working_dir.clone(),
            log_file: self.config.log_file.clone(),
            progress: progress_tx,
        };

        let mut running = match self.runner.spawn(context).await {
            Ok(running) => running,
            Err(RunnerError::Spawn(message)) => {
                self.fail_before_start(&action, &format!("failed to spawn action: {message}"));
                return;
            }
        };

        // Drive the action: wait for the runner while forwarding progress
        // and handling commands.
        enum Drive {
            Done(ActionOutcome),
            Progress(crate::runner::ActionProgress),
            Command(Option<SessionCommand>),
        }
        let mut canceling = false;
        let mut abandoned = false;
        let mut commands_open = true;
        let outcome = loop {
            let event = tokio::select! {
                outcome = running.wait() => Drive::Done(outcome),
                Some(progress) = progress_rx.recv() => Drive::Progress(progress),
                command = self.commands.recv(), if commands_open => Drive::Command(command),
            };
            match event {
                Drive::Done(outcome) => break outcome,
                Drive::Progress(progress) => {
                    self.report(ActionUpdate::running(
                        action_id.clone(),
                        started_at,
                        self.clock.now_utc(),
                        progress.progress_percent,
                        progress.message,
                    ));
                }
                Drive::Command(None) => {
                    // Scheduler gone; wind the action down.
                    commands_open = false;
                    canceling = true;
                    running.cancel(self.config.cancel_grace).await;
                }
                Drive::Command(Some(SessionCommand::CancelActions(ids))) => {
                    if ids.contains(&action_id) {
                        tracing::info!(
                            target: EVENT_TARGET,
                            kind = "Action",
                            op = %ActionOp::Cancel,
                            session_id = %self.config.session_id,
                            action_id = %action_id,
                            "canceling action"
                        );
                        canceling = true;
                        let others: Vec<ActionId> =
                            ids.into_iter().filter(|id| *id != action_id).collect();
                        if !others.is_empty() {
                            let _ = self
                                .handle_command(
                                    SessionCommand::CancelActions(others),
                                    Some(&action_id),
                                )
                                .await;
                        }
                        running.cancel(self.config.cancel_grace).await;
                    } else {
                        let _ = self
                            .handle_command(SessionCommand::CancelActions(ids), Some(&action_id))
                            .await;
                    }
                }
                Drive::Command(Some(SessionCommand::Stop {
                    outcome,
                    grace,
                    fail_message,
                    expedited,
                })) => {
                    self.stop = Some(StopState { outcome, grace, fail_message, expedited });
                    self.interrupt.cancel();
                    let grace = if expedited {
                        MIN_CANCEL_GRACE
                    } else {
                        grace.unwrap_or(self.config.cancel_grace)
                    };
                    running.cancel(grace).await;
                    if expedited {
                        // Do not wait for the runner to wind down.
                        abandoned = true;
                        break ActionOutcome {
                            state: OutcomeState::Canceled,
                            exit_code: None,
                            message: None,
                        };
                    }
                }
                Drive::Command(Some(command)) => {
                    let _ = self.handle_command(command, Some(&action_id)).await;
                }
            }
        };

        let ended_at = self.clock.now_utc();
        let (status, message) = match (&self.stop, canceling, outcome.state) {
            (Some(stop), _, _) if abandoned || outcome.state != OutcomeState::Succeeded => (
                stop.outcome.completed_status(),
                stop.fail_message.clone().or(outcome.message.clone()),
            ),
            (_, _, OutcomeState::Succeeded) => (CompletedStatus::Succeeded, outcome.message.clone()),
            (_, true, _) | (_, _, OutcomeState::Canceled) => {
                (CompletedStatus::Canceled, outcome.message.clone())
            }
            (_, _, OutcomeState::TimedOut) => (
                CompletedStatus::Failed,
                Some("TIMEOUT - Exceeded the allotted runtime limit.".into()),
            ),
            (_, _, OutcomeState::Failed) => (CompletedStatus::Failed, outcome.message.clone()),
        };

        tracing::info!(
            target: EVENT_TARGET,
            kind = "Action",
            op = %ActionOp::End,
            session_id = %self.config.session_id,
            action_id = %action_id,
            status = %status,
            exit_code = outcome.exit_code,
            "action complete"
        );
        self.report(ActionUpdate::completed(
            action_id.clone(),
            status,
            started_at,
            ended_at,
            message,
            outcome.exit_code,
        ));

        // Pending cancels resolve only after the running action's terminal
        // status has been recorded.
        self.apply_pending_cancels();

        if status.is_unsuccessful() && !action.kind.is_env_exit() {
            let message = match status {
                CompletedStatus::Failed if outcome.state == OutcomeState::TimedOut => {
                    format!("TIMEOUT - Previous action exceeded runtime limit: {action_id}")
                }
                _ => format!("Previous action did not succeed: {action_id}"),
            };
            self.mark_queue_never_attempted_except_env_exits(&message);
        }
    }

    /// Resolve the entity details an action needs, or the failure message.
    async fn resolve_details(&self, action: &AssignedAction) -> Result<ActionDetails, String> {
        self.resolve_details_with(action, &self.interrupt).await
    }

    async fn resolve_details_with(
        &self,
        action: &AssignedAction,
        interrupt: &CancellationToken,
    ) -> Result<ActionDetails, String> {
        let details = match &action.kind {
            ActionKind::EnvEnter { environment_id } | ActionKind::EnvExit { environment_id } => self
                .entities
                .environment_details(environment_id, interrupt)
                .await
                .map(ActionDetails::Environment),
            ActionKind::TaskRun { step_id, .. } => self
                .entities
                .step_details(step_id, interrupt)
                .await
                .map(ActionDetails::Step),
            ActionKind::SyncInputJobAttachments { step_id: Some(step_id) } => self
                .entities
                .step_details(step_id, interrupt)
                .await
                .map(ActionDetails::Step),
            ActionKind::SyncInputJobAttachments { step_id: None } => self
                .entities
                .job_attachment_details(interrupt)
                .await
                .map(ActionDetails::JobAttachments),
        }
        .map_err(|e| e.to_string())?;

        let schema_version = match &details {
            ActionDetails::Environment(d) => Some(d.schema_version.as_str()),
            ActionDetails::Step(d) => Some(d.schema_version.as_str()),
            ActionDetails::JobAttachments(_) => None,
        };
        if let Some(version) = schema_version {
            if !fh_api::is_supported_schema(version) {
                return Err(format!("Unsupported job description schema version {version}"));
            }
        }
        Ok(details)
    }

    /// Fail an action that never made it to the runner, then propagate.
    fn fail_before_start(&mut self, action: &AssignedAction, message: &str) {
        let now = self.clock.now_utc();
        tracing::error!(
            target: EVENT_TARGET,
            kind = "Action",
            op = %ActionOp::End,
            session_id = %self.config.session_id,
            action_id = %action.action_id,
            status = %CompletedStatus::Failed,
            message,
            "action failed to start"
        );
        self.report(ActionUpdate::completed(
            action.action_id.clone(),
            CompletedStatus::Failed,
            now,
            now,
            Some(message.to_string()),
            None,
        ));
        self.apply_pending_cancels();
        let message = format!("Error starting prior action {}", action.action_id);
        self.mark_queue_never_attempted_except_env_exits(&message);
    }

    fn apply_pending_cancels(&mut self) {
        if self.pending_cancels.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_cancels);
        for removed in self.queue.cancel_many(&pending) {
            self.report(ActionUpdate::never_attempted(
                removed.action_id,
                Some("canceled by the service".into()),
            ));
        }
    }

    fn mark_queue_never_attempted_except_env_exits(&mut self, message: &str) {
        let removed = self.queue.cancel_all_except_env_exits();
        if removed.is_empty() {
            return;
        }
        tracing::info!(
            target: EVENT_TARGET,
            kind = "Session",
            op = %SessionOp::Remove,
            session_id = %self.config.session_id,
            count = removed.len(),
            "marking queued actions as never attempted"
        );
        for action in removed {
            self.report(ActionUpdate::never_attempted(
                action.action_id,
                Some(message.to_string()),
            ));
        }
    }

    async fn cleanup(&mut self) {
        let stop = self.stop.take();
        let (fail_message, expedited, grace) = match &stop {
            Some(stop) => (stop.fail_message.clone(), stop.expedited, stop.grace),
            None => (None, false, None),
        };

        if expedited {
            // Everything still queued, environment exits included, is
            // reported NEVER_ATTEMPTED in one sweep; nothing else runs.
            for action in self.queue.drain_all() {
                self.report(ActionUpdate::never_attempted(
                    action.action_id,
                    fail_message.clone(),
                ));
            }
        } else {
            for action in self.queue.cancel_all_except_env_exits() {
                self.report(ActionUpdate::never_attempted(
                    action.action_id,
                    fail_message.clone(),
                ));
            }
            // Environment exits still run, within the grace budget.
            let deadline = grace.map(|g| Instant::now() + g);
            while let Some(action) = self.queue.pop_front() {
                self.run_env_exit(action, deadline).await;
            }
        }

        self.purge_local_state(expedited);
        self.sink.session_idle(&self.config.session_id);
        tracing::info!(
            target: EVENT_TARGET,
            kind = "Session",
            op = %SessionOp::Complete,
            session_id = %self.config.session_id,
            queue_id = %self.config.queue_id,
            job_id = %self.config.job_id,
            "session complete"
        );
    }

    /// Run one environment-exit during teardown. Commands are no longer
    /// consumed at this point; the deadline bounds the total teardown time.
    async fn run_env_exit(&mut self, action: AssignedAction, deadline: Option<Instant>) {
        let action_id = action.action_id.clone();
        // The session interrupt token fired when the stop was requested;
        // teardown fetches use a fresh token bounded by the drain deadline.
        let teardown_interrupt = CancellationToken::new();
        let resolved = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(
                    deadline,
                    self.resolve_details_with(&action, &teardown_interrupt),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err("drain grace exhausted before details were fetched".into()),
                }
            }
            None => self.resolve_details_with(&action, &teardown_interrupt).await,
        };
        let details = match resolved {
            Ok(details) => details,
            Err(message) => {
                let now = self.clock.now_utc();
                self.report(ActionUpdate::completed(
                    action_id,
                    CompletedStatus::Failed,
                    now,
                    now,
                    Some(message),
                    None,
                ));
                return;
            }
        };

        let started_at = self.clock.now_utc();
        let (progress_tx, _progress_rx) = mpsc::unbounded_channel();
        let context = ActionContext {
            session_id: self.config.session_id.clone(),
            queue_id: self.config.queue_id.clone(),
            job_id: self.config.job_id.clone(),
            action: action.clone(),
            details,
            os_user: self.config.os_user.clone(),
            env: self.config.env.clone(),
            working_dir: self.config.working_dir.clone(),
            log_file: self.config.log_file.clone(),
            progress: progress_tx,
        };
        let mut running = match self.runner.spawn(context).await {
            Ok(running) => running,
            Err(RunnerError::Spawn(message)) => {
                let now = self.clock.now_utc();
                self.report(ActionUpdate::completed(
                    action_id,
                    CompletedStatus::Failed,
                    now,
                    now,
                    Some(format!("failed to spawn action: {message}")),
                    None,
                ));
                return;
            }
        };

        let outcome = match deadline {
            Some(deadline) => {
                let finished = tokio::select! {
                    outcome = running.wait() => Some(outcome),
                    _ = tokio::time::sleep_until(deadline) => None,
                };
                match finished {
                    Some(outcome) => outcome,
                    None => {
                        running.cancel(MIN_CANCEL_GRACE).await;
                        running.wait().await
                    }
                }
            }
            None => running.wait().await,
        };

        let status = match outcome.state {
            OutcomeState::Succeeded => CompletedStatus::Succeeded,
            OutcomeState::Canceled => CompletedStatus::Canceled,
            OutcomeState::Failed | OutcomeState::TimedOut => CompletedStatus::Failed,
        };
        self.report(ActionUpdate::completed(
            action_id,
            status,
            started_at,
            self.clock.now_utc(),
            outcome.message,
            outcome.exit_code,
        ));
    }

    fn purge_local_state(&self, abnormal: bool) {
        if self.config.retain_working_dir || abnormal {
            return;
        }
        if self.config.working_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.config.working_dir) {
                tracing::warn!(
                    session_id = %self.config.session_id,
                    error = %e,
                    "failed to remove session working directory"
                );
            }
        }
        if self.config.log_file.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.log_file) {
                tracing::warn!(
                    session_id = %self.config.session_id,
                    error = %e,
                    "failed to remove session log file"
                );
            }
        }
    }

    fn report(&self, update: ActionUpdate) {
        self.sink.report(&self.config.session_id, update);
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
