// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-operation retry wrappers implementing the agent's error policy.
//!
//! Each wrapper loops on Throttled/InternalServer with jittered exponential
//! backoff and classifies everything else into a [`RequestError`]. The
//! classifications differ per operation; they are kept here, next to each
//! other, so the policy table stays reviewable in one place.

use crate::backoff::{apply_lower_bound, Backoff};
use crate::client::{Auth, ServiceClient};
use crate::error::{ConflictReason, RequestError, ServiceError};
use crate::types::{
    AwsCredentialsData, BatchEntityResponse, EntityRef, ScheduleResponse, UpdatedActionInfo,
    WorkerIds,
};
use fh_core::event::{ApiOp, EVENT_TARGET};
use fh_core::{ActionId, FarmId, FleetId, QueueId, WorkerId, WorkerTargetStatus};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How long queue STATUS_CONFLICTs are treated as eventual consistency
/// before AssumeQueueRoleForWorker gives up.
const QUEUE_STATUS_CONSISTENCY_WINDOW: Duration = Duration::from_secs(10);

/// Retry ceiling for InternalServerError on BatchGetJobEntity. Other loop
/// paths retry forever; entity fetches fail the affected action instead.
pub const BATCH_GET_MAX_INTERNAL_ERROR_RETRIES: u32 = 5;

async fn retry_sleep(
    operation: &str,
    error: &ServiceError,
    backoff: &Backoff,
    attempt: u32,
    interrupt: &CancellationToken,
) -> Result<(), RequestError> {
    let retry_after = match error {
        ServiceError::Throttled { retry_after } => *retry_after,
        _ => None,
    };
    let delay = apply_lower_bound(backoff.delay(attempt), retry_after);
    tracing::info!(
        target: EVENT_TARGET,
        kind = "Api",
        op = %ApiOp::Response,
        operation,
        error = %error,
        delay_ms = delay.as_millis() as u64,
        "retrying after recoverable service error"
    );
    tokio::select! {
        _ = interrupt.cancelled() => Err(RequestError::Interrupted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// CreateWorker: register this host and obtain a worker id.
pub async fn create_worker(
    client: &dyn ServiceClient,
    farm_id: &FarmId,
    fleet_id: &FleetId,
    interrupt: &CancellationToken,
) -> Result<WorkerId, RequestError> {
    let backoff = Backoff::default();
    let mut attempt = 0;
    loop {
        if interrupt.is_cancelled() {
            return Err(RequestError::Interrupted);
        }
        let error = match client.create_worker(farm_id, fleet_id, Auth::Bootstrap).await {
            Ok(worker_id) => return Ok(worker_id),
            Err(e) => e,
        };
        match &error {
            e if e.is_retryable() => {}
            ServiceError::Conflict { reason: ConflictReason::ResourceAlreadyExists, .. } => {
                tracing::error!(
                    "A Worker for these credentials already exists. Delete it, or configure \
                     the agent with its worker id."
                );
                return Err(RequestError::Unrecoverable(error));
            }
            ServiceError::Conflict {
                reason: ConflictReason::StatusConflict,
                resource_id,
                context,
            } if resource_id == fleet_id.as_str()
                && context.as_deref() == Some("CREATE_IN_PROGRESS") =>
            {
                tracing::info!(fleet_id = %fleet_id, "fleet is still being created");
            }
            _ => return Err(RequestError::Unrecoverable(error)),
        }
        retry_sleep("CreateWorker", &error, &backoff, attempt, interrupt).await?;
        attempt += 1;
    }
}

/// AssumeFleetRoleForWorker: obtain or refresh the agent credentials.
pub async fn assume_fleet_role_for_worker(
    client: &dyn ServiceClient,
    ids: &WorkerIds,
    auth: Auth,
    interrupt: &CancellationToken,
) -> Result<AwsCredentialsData, RequestError> {
    let backoff = Backoff::default();
    let mut attempt = 0;
    loop {
        if interrupt.is_cancelled() {
            return Err(RequestError::Interrupted);
        }
        let error = match client.assume_fleet_role_for_worker(ids, auth).await {
            Ok(credentials) => return Ok(credentials),
            Err(e) => e,
        };
        if !error.is_retryable() {
            return Err(RequestError::Unrecoverable(error));
        }
        retry_sleep("AssumeFleetRoleForWorker", &error, &backoff, attempt, interrupt).await?;
        attempt += 1;
    }
}

/// AssumeQueueRoleForWorker: obtain or refresh queue credentials.
pub async fn assume_queue_role_for_worker(
    client: &dyn ServiceClient,
    ids: &WorkerIds,
    queue_id: &QueueId,
    interrupt: &CancellationToken,
) -> Result<Option<AwsCredentialsData>, RequestError> {
    assume_queue_role_with_window(client, ids, queue_id, interrupt, QUEUE_STATUS_CONSISTENCY_WINDOW)
        .await
}

async fn assume_queue_role_with_window(
    client: &dyn ServiceClient,
    ids: &WorkerIds,
    queue_id: &QueueId,
    interrupt: &CancellationToken,
    consistency_window: Duration,
) -> Result<Option<AwsCredentialsData>, RequestError> {
    let backoff = Backoff::default();
    let mut attempt = 0;
    let query_start = Instant::now();
    loop {
        if interrupt.is_cancelled() {
            return Err(RequestError::Interrupted);
        }
        let error = match client.assume_queue_role_for_worker(ids, queue_id, Auth::Agent).await {
            Ok(credentials) => return Ok(credentials),
            Err(e) => e,
        };
        match &error {
            e if e.is_retryable() => {}
            // The caller may run the session without credentials.
            ServiceError::AccessDenied { .. } | ServiceError::Validation { .. } => {
                return Err(RequestError::Recoverable(error));
            }
            // Worker or queue gone; fail the queue's actions.
            ServiceError::NotFound { .. } => return Err(RequestError::Unrecoverable(error)),
            ServiceError::Conflict { reason: ConflictReason::StatusConflict, resource_id, .. } => {
                if resource_id == ids.worker_id.as_str() {
                    return Err(RequestError::WorkerOffline(error));
                } else if resource_id == queue_id.as_str() {
                    // Queue status conflicts can be eventual consistency;
                    // retry inside the window, then let the caller decide.
                    if query_start.elapsed() > consistency_window {
                        return Err(RequestError::Recoverable(error));
                    }
                } else {
                    return Err(RequestError::Recoverable(error));
                }
            }
            ServiceError::Conflict { .. } => return Err(RequestError::Recoverable(error)),
            _ => return Err(RequestError::Unrecoverable(error)),
        }
        retry_sleep("AssumeQueueRoleForWorker", &error, &backoff, attempt, interrupt).await?;
        attempt += 1;
    }
}

/// UpdateWorker: request a worker status transition.
///
/// A STARTED request against a worker the service holds in STOPPING or
/// NOT_COMPATIBLE first transitions through STOPPED, then retries STARTED
/// with a fresh attempt count.
pub async fn update_worker(
    client: &dyn ServiceClient,
    ids: &WorkerIds,
    target_status: WorkerTargetStatus,
    interrupt: &CancellationToken,
) -> Result<(), RequestError> {
    let backoff = Backoff::default();
    let mut attempt = 0;
    loop {
        if interrupt.is_cancelled() {
            return Err(RequestError::Interrupted);
        }
        let error = match client.update_worker(ids, target_status, Auth::Agent).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        let mut must_stop_first = false;
        match &error {
            e if e.is_retryable() => {}
            ServiceError::NotFound { .. } => return Err(RequestError::WorkerNotFound(error)),
            ServiceError::AccessDenied { .. } | ServiceError::Validation { .. } => {
                return Err(RequestError::Unrecoverable(error));
            }
            ServiceError::Conflict { reason: ConflictReason::ConcurrentModification, .. } => {
                tracing::info!(target = %target_status, "UpdateWorker conflict; retrying");
            }
            ServiceError::Conflict {
                reason: ConflictReason::StatusConflict,
                resource_id,
                context,
            } if resource_id == ids.worker_id.as_str() => {
                match context.as_deref() {
                    // The host's instance profile is still attached; the
                    // service will accept the transition once it detaches.
                    Some("ASSOCIATED") => {
                        tracing::info!("instance profile still attached; retrying UpdateWorker");
                    }
                    Some("STOPPING") | Some("NOT_COMPATIBLE")
                        if target_status == WorkerTargetStatus::Started =>
                    {
                        tracing::info!(
                            context = context.as_deref().unwrap_or_default(),
                            "worker must pass through STOPPED before STARTED"
                        );
                        must_stop_first = true;
                    }
                    _ => return Err(RequestError::Unrecoverable(error)),
                }
            }
            _ => return Err(RequestError::Unrecoverable(error)),
        }

        if must_stop_first {
            Box::pin(update_worker(client, ids, WorkerTargetStatus::Stopped, interrupt)).await?;
            attempt = 0;
            continue;
        }

        retry_sleep("UpdateWorker", &error, &backoff, attempt, interrupt).await?;
        attempt += 1;
    }
}

/// UpdateWorkerSchedule: the heartbeat. Reports action updates, receives
/// assignments.
pub async fn update_worker_schedule(
    client: &dyn ServiceClient,
    ids: &WorkerIds,
    updated_session_actions: &BTreeMap<ActionId, UpdatedActionInfo>,
    interrupt: &CancellationToken,
) -> Result<ScheduleResponse, RequestError> {
    let backoff = Backoff::default();
    let mut attempt = 0;
    loop {
        if interrupt.is_cancelled() {
            return Err(RequestError::Interrupted);
        }
        let error = match client
            .update_worker_schedule(ids, updated_session_actions, Auth::Agent)
            .await
        {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        match &error {
            e if e.is_retryable() => {}
            ServiceError::NotFound { .. } => return Err(RequestError::WorkerNotFound(error)),
            ServiceError::Conflict { reason: ConflictReason::ConcurrentModification, .. } => {
                tracing::info!("UpdateWorkerSchedule conflict; retrying");
            }
            ServiceError::Conflict { reason: ConflictReason::StatusConflict, resource_id, .. } => {
                if resource_id == ids.worker_id.as_str() {
                    return Err(RequestError::WorkerOffline(error));
                }
                return Err(RequestError::Unrecoverable(error));
            }
            _ => return Err(RequestError::Unrecoverable(error)),
        }
        retry_sleep("UpdateWorkerSchedule", &error, &backoff, attempt, interrupt).await?;
        attempt += 1;
    }
}

/// BatchGetJobEntity: fetch entity details for sessions.
///
/// InternalServerError retries are bounded here; a persistently failing
/// entity fetch fails the affected action rather than wedging the agent.
pub async fn batch_get_job_entity(
    client: &dyn ServiceClient,
    ids: &WorkerIds,
    entity_refs: &[EntityRef],
    interrupt: &CancellationToken,
) -> Result<BatchEntityResponse, RequestError> {
    let backoff = Backoff::default();
    let mut attempt = 0;
    let mut internal_errors = 0;
    loop {
        if interrupt.is_cancelled() {
            return Err(RequestError::Interrupted);
        }
        let error = match client.batch_get_job_entity(ids, entity_refs, Auth::Agent).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        match &error {
            ServiceError::Throttled { .. } => {}
            ServiceError::InternalServer { .. } => {
                internal_errors += 1;
                if internal_errors > BATCH_GET_MAX_INTERNAL_ERROR_RETRIES {
                    return Err(RequestError::Unrecoverable(error));
                }
            }
            ServiceError::NotFound { .. } => return Err(RequestError::WorkerNotFound(error)),
            _ => return Err(RequestError::Unrecoverable(error)),
        }
        retry_sleep("BatchGetJobEntity", &error, &backoff, attempt, interrupt).await?;
        attempt += 1;
    }
}

/// DeleteWorker: remove this worker from the fleet.
pub async fn delete_worker(
    client: &dyn ServiceClient,
    ids: &WorkerIds,
    interrupt: &CancellationToken,
) -> Result<(), RequestError> {
    let backoff = Backoff::default();
    let mut attempt = 0;
    loop {
        if interrupt.is_cancelled() {
            return Err(RequestError::Interrupted);
        }
        let error = match client.delete_worker(ids, Auth::Agent).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        match &error {
            e if e.is_retryable() => {}
            ServiceError::Conflict {
                reason: ConflictReason::StatusConflict,
                resource_id,
                context,
            } if resource_id == ids.worker_id.as_str()
                && matches!(
                    context.as_deref(),
                    Some("STARTED")
                        | Some("STOPPING")
                        | Some("NOT_RESPONDING")
                        | Some("NOT_COMPATIBLE")
                        | Some("RUNNING")
                        | Some("IDLE")
                ) =>
            {
                // The worker must reach STOPPED before it can be deleted.
                return Err(RequestError::Recoverable(error));
            }
            _ => return Err(RequestError::Unrecoverable(error)),
        }
        retry_sleep("DeleteWorker", &error, &backoff, attempt, interrupt).await?;
        attempt += 1;
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
