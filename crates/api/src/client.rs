// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The service client capability.
//!
//! One method per remote operation, returning either the typed success or a
//! [`ServiceError`]. Transport-level retries, signing, and endpoints belong
//! to the implementation; the core only retries on the error kinds the
//! policy table allows.

use crate::error::ServiceError;
use crate::types::{
    AssignedAction, AwsCredentialsData, BatchEntityResponse, EntityRef, ScheduleResponse,
    UpdatedActionInfo, WorkerIds,
};
use async_trait::async_trait;
use fh_core::{ActionId, FarmId, FleetId, QueueId, WorkerId, WorkerTargetStatus};
use std::collections::BTreeMap;

/// Which credential set authenticates a call.
///
/// The client never mixes the two in one call: bootstrap credentials carry a
/// worker through registration, agent credentials carry everything after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Bootstrap,
    Agent,
}

/// The seven named operations of the scheduling service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn create_worker(
        &self,
        farm_id: &FarmId,
        fleet_id: &FleetId,
        auth: Auth,
    ) -> Result<WorkerId, ServiceError>;

    async fn assume_fleet_role_for_worker(
        &self,
        ids: &WorkerIds,
        auth: Auth,
    ) -> Result<AwsCredentialsData, ServiceError>;

    /// Returns `None` when the queue has no role to assume.
    async fn assume_queue_role_for_worker(
        &self,
        ids: &WorkerIds,
        queue_id: &QueueId,
        auth: Auth,
    ) -> Result<Option<AwsCredentialsData>, ServiceError>;

    async fn update_worker(
        &self,
        ids: &WorkerIds,
        target_status: WorkerTargetStatus,
        auth: Auth,
    ) -> Result<(), ServiceError>;

    async fn update_worker_schedule(
        &self,
        ids: &WorkerIds,
        updated_session_actions: &BTreeMap<ActionId, UpdatedActionInfo>,
        auth: Auth,
    ) -> Result<ScheduleResponse, ServiceError>;

    async fn batch_get_job_entity(
        &self,
        ids: &WorkerIds,
        entity_refs: &[EntityRef],
        auth: Auth,
    ) -> Result<BatchEntityResponse, ServiceError>;

    async fn delete_worker(&self, ids: &WorkerIds, auth: Auth) -> Result<(), ServiceError>;
}

/// Convenience for code that stores sessions' assigned actions keyed by id.
pub fn actions_by_id(actions: &[AssignedAction]) -> BTreeMap<ActionId, &AssignedAction> {
    actions.iter().map(|a| (a.action_id.clone(), a)).collect()
}
