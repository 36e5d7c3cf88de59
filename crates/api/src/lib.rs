// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fh-api: the remote scheduling service contract.
//!
//! The concrete HTTP/signing client lives outside the core; this crate
//! defines the seven named operations, their typed inputs and outputs, the
//! closed error taxonomy, and the per-operation retry wrappers that the rest
//! of the agent calls.

pub mod backoff;
pub mod client;
pub mod error;
pub mod retry;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use backoff::Backoff;
pub use client::{Auth, ServiceClient};
pub use error::{ConflictReason, RequestError, ServiceError};
pub use types::{
    is_supported_schema, AssignedAction, AssignedSession, AwsCredentialsData, BatchEntityResponse,
    EntityData, EntityErrorCode, EntityFailure, EntityRef, EnvironmentDetailsData,
    JobAttachmentDetailsData, JobAttachmentQueueSettings, JobDetailsData, JobRunAsUser,
    LogConfiguration, ManifestProperties, PathMappingRule, PosixUser, RunAs, ScheduleResponse,
    StepDetailsData, UpdatedActionInfo, WorkerIds, SUPPORTED_SCHEMA_VERSIONS,
};
