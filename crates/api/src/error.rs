// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed error taxonomy for service operations.
//!
//! [`ServiceError`] is what a single call can return; [`RequestError`] is
//! the classified outcome of a retry wrapper, which is all the rest of the
//! agent ever sees.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Why a Conflict was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictReason {
    StatusConflict,
    ConcurrentModification,
    ResourceAlreadyExists,
}

fh_core::simple_display! {
    ConflictReason {
        StatusConflict => "STATUS_CONFLICT",
        ConcurrentModification => "CONCURRENT_MODIFICATION",
        ResourceAlreadyExists => "RESOURCE_ALREADY_EXISTS",
    }
}

/// An error from one invocation of a service operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("throttled")]
    Throttled { retry_after: Option<Duration> },

    #[error("internal server error: {message}")]
    InternalServer { message: String },

    #[error("access denied: {message}")]
    AccessDenied { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("resource not found: {resource_id}")]
    NotFound { resource_id: String },

    #[error("conflict {reason} on {resource_id}")]
    Conflict {
        reason: ConflictReason,
        resource_id: String,
        /// Status of the conflicting resource, when the service reports one
        /// (e.g. ASSOCIATED, STOPPING, NOT_COMPATIBLE, CREATE_IN_PROGRESS).
        context: Option<String>,
    },
}

impl ServiceError {
    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::InternalServer { message: message.into() }
    }

    pub fn conflict(
        reason: ConflictReason,
        resource_id: impl Into<String>,
        context: Option<&str>,
    ) -> Self {
        ServiceError::Conflict {
            reason,
            resource_id: resource_id.into(),
            context: context.map(str::to_string),
        }
    }

    /// True for the error kinds the core retries in loop paths.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Throttled { .. } | ServiceError::InternalServer { .. }
        )
    }
}

/// Classified outcome of a retried operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// The operation cannot succeed; the caller must give up on it.
    #[error("unrecoverable: {0}")]
    Unrecoverable(ServiceError),

    /// The service no longer considers this worker online
    /// (STATUS_CONFLICT against the worker resource).
    #[error("worker is no longer online: {0}")]
    WorkerOffline(ServiceError),

    /// The worker resource does not exist (likely deleted).
    #[error("worker not found: {0}")]
    WorkerNotFound(ServiceError),

    /// The operation failed in a way the caller may choose to recover from
    /// (e.g. run a session without queue credentials).
    #[error("recoverable: {0}")]
    Recoverable(ServiceError),

    /// The interrupt token fired while waiting to retry.
    #[error("request interrupted")]
    Interrupted,
}

impl RequestError {
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            RequestError::Unrecoverable(e)
            | RequestError::WorkerOffline(e)
            | RequestError::WorkerNotFound(e)
            | RequestError::Recoverable(e) => Some(e),
            RequestError::Interrupted => None,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
