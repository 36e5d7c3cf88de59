// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ActionRunner capability: the boundary to the job-execution sandbox.
//!
//! The core never calls OS process APIs directly. It hands the runner an
//! [`ActionContext`] (what to run, as whom, with which environment and
//! details) and gets back a handle it can wait on or cancel. Timeouts,
//! stdout/stderr capture, and signal propagation are the runner's concern.

use fh_api::{
    AssignedAction, EnvironmentDetailsData, JobAttachmentDetailsData, PosixUser, StepDetailsData,
};
use fh_core::{JobId, QueueId, SessionId};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Entity details resolved for the action being run.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDetails {
    Environment(EnvironmentDetailsData),
    Step(StepDetailsData),
    JobAttachments(JobAttachmentDetailsData),
}

/// In-flight progress from the runner, forwarded to the service as a
/// Running update.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionProgress {
    pub progress_percent: Option<f32>,
    pub message: Option<String>,
}

/// Everything the sandbox needs to execute one action.
pub struct ActionContext {
    pub session_id: SessionId,
    pub queue_id: QueueId,
    pub job_id: JobId,
    pub action: AssignedAction,
    pub details: ActionDetails,
    /// OS user to impersonate; `None` runs as the agent user.
    pub os_user: Option<PosixUser>,
    /// Environment handed to the subprocess. Never contains agent
    /// credentials; queue credentials arrive only as file paths.
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
    pub log_file: PathBuf,
    pub progress: mpsc::UnboundedSender<ActionProgress>,
}

/// How the subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeState {
    Succeeded,
    Failed,
    Canceled,
    TimedOut,
}

/// Final result of one action run.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub state: OutcomeState,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(exit_code: i32) -> Self {
        Self { state: OutcomeState::Succeeded, exit_code: Some(exit_code), message: None }
    }

    pub fn failed(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self { state: OutcomeState::Failed, exit_code, message: Some(message.into()) }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn subprocess: {0}")]
    Spawn(String),
}

/// A running action. Dropped handles must not leak the subprocess; the
/// runner owns reaping.
#[async_trait]
pub trait RunningAction: Send {
    /// Wait for the action to reach a terminal state.
    async fn wait(&mut self) -> ActionOutcome;

    /// Begin cancelation: soft termination signal, then a hard stop once
    /// `grace` elapses. Idempotent. `wait` still reports the final state.
    async fn cancel(&mut self, grace: Duration);
}

/// The job-execution sandbox capability.
#[async_trait]
pub trait ActionRunner: Send + Sync + 'static {
    async fn spawn(&self, ctx: ActionContext) -> Result<Box<dyn RunningAction>, RunnerError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! Scripted runner for session and scheduler tests.

    use super::*;
    use fh_core::ActionId;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Scripted behavior for one action id.
    #[derive(Debug, Clone)]
    pub enum ScriptedOutcome {
        /// Finish immediately with the outcome.
        Finish(ActionOutcome),
        /// Fail to spawn.
        SpawnError(String),
        /// Run until canceled (or until the test releases it).
        RunUntilCanceled,
    }

    #[derive(Default)]
    struct FakeState {
        script: HashMap<ActionId, ScriptedOutcome>,
        started: Vec<ActionId>,
        canceled: Vec<(ActionId, Duration)>,
        release: HashMap<ActionId, Arc<CancellationToken>>,
    }

    /// An [`ActionRunner`] that follows a per-action script. Unscripted
    /// actions succeed immediately with exit code 0.
    #[derive(Default, Clone)]
    pub struct FakeRunner {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, action_id: ActionId, outcome: ScriptedOutcome) {
            self.state.lock().script.insert(action_id, outcome);
        }

        /// Actions the runner has spawned, in order.
        pub fn started(&self) -> Vec<ActionId> {
            self.state.lock().started.clone()
        }

        /// Cancels the runner has received, with their grace periods.
        pub fn canceled(&self) -> Vec<(ActionId, Duration)> {
            self.state.lock().canceled.clone()
        }

        /// Let a RunUntilCanceled action finish on its own (as Succeeded).
        pub fn release(&self, action_id: &ActionId) {
            if let Some(token) = self.state.lock().release.get(action_id.as_str()) {
                token.cancel();
            }
        }
    }

    struct FakeRunning {
        action_id: ActionId,
        outcome: ActionOutcome,
        blocker: Option<Arc<CancellationToken>>,
        canceled: bool,
        state: Arc<Mutex<FakeState>>,
    }

    #[async_trait]
    impl RunningAction for FakeRunning {
        async fn wait(&mut self) -> ActionOutcome {
            if let Some(blocker) = &self.blocker {
                blocker.cancelled().await;
                if self.canceled {
                    return ActionOutcome {
                        state: OutcomeState::Canceled,
                        exit_code: None,
                        message: self.outcome.message.clone(),
                    };
                }
                return ActionOutcome::succeeded(0);
            }
            self.outcome.clone()
        }

        async fn cancel(&mut self, grace: Duration) {
            self.canceled = true;
            self.state.lock().canceled.push((self.action_id.clone(), grace));
            if let Some(blocker) = &self.blocker {
                blocker.cancel();
            }
        }
    }

    #[async_trait]
    impl ActionRunner for FakeRunner {
        async fn spawn(&self, ctx: ActionContext) -> Result<Box<dyn RunningAction>, RunnerError> {
            let action_id = ctx.action.action_id.clone();
            let scripted = {
                let mut state = self.state.lock();
                state.started.push(action_id.clone());
                state.script.get(&action_id).cloned()
            };
            match scripted {
                Some(ScriptedOutcome::SpawnError(message)) => Err(RunnerError::Spawn(message)),
                Some(ScriptedOutcome::Finish(outcome)) => Ok(Box::new(FakeRunning {
                    action_id,
                    outcome,
                    blocker: None,
                    canceled: false,
                    state: self.state.clone(),
                })),
                Some(ScriptedOutcome::RunUntilCanceled) => {
                    let blocker = Arc::new(CancellationToken::new());
                    self.state
                        .lock()
                        .release
                        .insert(action_id.clone(), blocker.clone());
                    Ok(Box::new(FakeRunning {
                        action_id,
                        outcome: ActionOutcome::succeeded(0),
                        blocker: Some(blocker),
                        canceled: false,
                        state: self.state.clone(),
                    }))
                }
                None => Ok(Box::new(FakeRunning {
                    action_id,
                    outcome: ActionOutcome::succeeded(0),
                    blocker: None,
                    canceled: false,
                    state: self.state.clone(),
                })),
            }
        }
    }
}
