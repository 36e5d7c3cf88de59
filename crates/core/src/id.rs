// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifiers for the remote service's resources.
//!
//! All of these are minted by the service and treated as opaque strings on
//! the worker host. The agent never fabricates one.

use crate::define_id;

define_id! {
    /// Unique identifier for a farm.
    pub struct FarmId;
}

define_id! {
    /// Unique identifier for a fleet within a farm.
    pub struct FleetId;
}

define_id! {
    /// Unique identifier for a worker within a fleet.
    ///
    /// Persisted on disk across agent restarts; a host with a persisted
    /// WorkerId never calls CreateWorker again.
    pub struct WorkerId;
}

define_id! {
    /// Unique identifier for a queue.
    pub struct QueueId;
}

define_id! {
    /// Unique identifier for a job within a queue.
    pub struct JobId;
}

define_id! {
    /// Unique identifier for a session assigned to this worker.
    pub struct SessionId;
}

define_id! {
    /// Unique identifier for a session action.
    pub struct ActionId;
}

define_id! {
    /// Unique identifier for a step within a job.
    pub struct StepId;
}

define_id! {
    /// Unique identifier for a task within a step.
    pub struct TaskId;
}

define_id! {
    /// Unique identifier for an environment within a job.
    pub struct EnvironmentId;
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
