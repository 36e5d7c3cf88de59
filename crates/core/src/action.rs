// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session action model: action kinds, terminal statuses, and the status
//! updates a session reports back to the scheduler.

use crate::id::{ActionId, EnvironmentId, StepId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum character length of a progress message sent to the service.
pub const PROGRESS_MESSAGE_MAX_CHARS: usize = 4096;

/// A task parameter value, tagged by type on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskParameter {
    String(String),
    Path(String),
    Int(String),
    Float(String),
}

/// The kind of work a session action performs.
///
/// The pipeline handles every variant exhaustively; an action kind the agent
/// does not recognize never constructs one of these and is failed upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "actionType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    SyncInputJobAttachments {
        #[serde(skip_serializing_if = "Option::is_none")]
        step_id: Option<StepId>,
    },
    EnvEnter {
        environment_id: EnvironmentId,
    },
    TaskRun {
        step_id: StepId,
        task_id: TaskId,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        parameters: BTreeMap<String, TaskParameter>,
    },
    EnvExit {
        environment_id: EnvironmentId,
    },
}

impl ActionKind {
    /// True for environment-exit actions, which survive pipeline cancelation.
    pub fn is_env_exit(&self) -> bool {
        matches!(self, ActionKind::EnvExit { .. })
    }

    pub fn step_id(&self) -> Option<&StepId> {
        match self {
            ActionKind::TaskRun { step_id, .. } => Some(step_id),
            ActionKind::SyncInputJobAttachments { step_id } => step_id.as_ref(),
            _ => None,
        }
    }
}

crate::simple_display! {
    ActionKind {
        SyncInputJobAttachments { .. } => "SYNC_INPUT_JOB_ATTACHMENTS",
        EnvEnter { .. } => "ENV_ENTER",
        TaskRun { .. } => "TASK_RUN",
        EnvExit { .. } => "ENV_EXIT",
    }
}

/// Terminal status of a session action, as reported to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletedStatus {
    Succeeded,
    Failed,
    Canceled,
    Interrupted,
    NeverAttempted,
}

impl CompletedStatus {
    /// True for any terminal status that should halt the rest of the
    /// pipeline (everything except success).
    pub fn is_unsuccessful(&self) -> bool {
        !matches!(self, CompletedStatus::Succeeded)
    }
}

crate::simple_display! {
    CompletedStatus {
        Succeeded => "SUCCEEDED",
        Failed => "FAILED",
        Canceled => "CANCELED",
        Interrupted => "INTERRUPTED",
        NeverAttempted => "NEVER_ATTEMPTED",
    }
}

/// A single status update for a session action, flowing from a session
/// runtime to the scheduler and onward to the service.
///
/// Construct through [`ActionUpdate::running`], [`ActionUpdate::completed`],
/// or [`ActionUpdate::never_attempted`] so the timestamp invariants hold:
/// a NEVER_ATTEMPTED update carries neither `started_at` nor `ended_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionUpdate {
    pub action_id: ActionId,
    pub completed_status: Option<CompletedStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub progress_percent: Option<f32>,
    pub message: Option<String>,
    pub exit_code: Option<i32>,
}

impl ActionUpdate {
    /// A non-terminal progress update for a running action.
    pub fn running(
        action_id: ActionId,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        progress_percent: Option<f32>,
        message: Option<String>,
    ) -> Self {
        Self {
            action_id,
            completed_status: None,
            started_at: Some(started_at),
            ended_at: None,
            updated_at: Some(now),
            progress_percent,
            message,
            exit_code: None,
        }
    }

    /// A terminal update for an action that ran (or was canceled mid-run).
    pub fn completed(
        action_id: ActionId,
        status: CompletedStatus,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        message: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        debug_assert!(status != CompletedStatus::NeverAttempted);
        Self {
            action_id,
            completed_status: Some(status),
            started_at: Some(started_at),
            ended_at: Some(ended_at),
            updated_at: None,
            progress_percent: None,
            message,
            exit_code,
        }
    }

    /// A terminal update for an action that never started. No timestamps.
    pub fn never_attempted(action_id: ActionId, message: Option<String>) -> Self {
        Self {
            action_id,
            completed_status: Some(CompletedStatus::NeverAttempted),
            started_at: None,
            ended_at: None,
            updated_at: None,
            progress_percent: None,
            message,
            exit_code: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.completed_status.is_some()
    }

    /// True for terminal statuses that the scheduler must report without
    /// waiting for the next poll interval.
    pub fn needs_immediate_report(&self) -> bool {
        matches!(
            self.completed_status,
            Some(CompletedStatus::Failed)
                | Some(CompletedStatus::Canceled)
                | Some(CompletedStatus::Interrupted)
        )
    }
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;
