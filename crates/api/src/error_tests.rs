// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn retryable_kinds() {
    assert!(ServiceError::Throttled { retry_after: None }.is_retryable());
    assert!(ServiceError::internal("boom").is_retryable());
    assert!(!ServiceError::AccessDenied { message: "no".into() }.is_retryable());
    assert!(!ServiceError::NotFound { resource_id: "worker-1".into() }.is_retryable());
    assert!(!ServiceError::conflict(ConflictReason::StatusConflict, "worker-1", None)
        .is_retryable());
}

#[test]
fn conflict_display_uses_wire_reason() {
    let err = ServiceError::conflict(
        ConflictReason::ConcurrentModification,
        "worker-1",
        Some("STOPPING"),
    );
    let rendered = err.to_string();
    assert!(rendered.contains("CONCURRENT_MODIFICATION"));
    assert!(rendered.contains("worker-1"));
}

#[test]
fn request_error_exposes_inner() {
    let inner = ServiceError::NotFound { resource_id: "queue-1".into() };
    let err = RequestError::Unrecoverable(inner.clone());
    assert_eq!(err.service_error(), Some(&inner));
    assert_eq!(RequestError::Interrupted.service_error(), None);
}
