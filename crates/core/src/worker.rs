// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker lifecycle status vocabulary.

use serde::{Deserialize, Serialize};

/// The worker's lifecycle state as tracked by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Deleted,
}

crate::simple_display! {
    WorkerStatus {
        Created => "CREATED",
        Starting => "STARTING",
        Started => "STARTED",
        Stopping => "STOPPING",
        Stopped => "STOPPED",
        Deleted => "DELETED",
    }
}

/// Status values the agent may request through UpdateWorker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerTargetStatus {
    Started,
    Stopping,
    Stopped,
}

crate::simple_display! {
    WorkerTargetStatus {
        Started => "STARTED",
        Stopping => "STOPPING",
        Stopped => "STOPPED",
    }
}

/// Status transition the service may request of the agent in an
/// UpdateWorkerSchedule response. STOPPED is the only value the service
/// sends, and it guarantees an empty assignment set alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesiredWorkerStatus {
    Stopped,
}

crate::simple_display! {
    DesiredWorkerStatus {
        Stopped => "STOPPED",
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
