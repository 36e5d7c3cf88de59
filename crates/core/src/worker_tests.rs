// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn worker_status_display() {
    assert_eq!(WorkerStatus::Started.to_string(), "STARTED");
    assert_eq!(WorkerStatus::Stopping.to_string(), "STOPPING");
}

#[test]
fn target_status_serde() {
    let json = serde_json::to_string(&WorkerTargetStatus::Stopped).unwrap();
    assert_eq!(json, "\"STOPPED\"");
    let parsed: WorkerTargetStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, WorkerTargetStatus::Stopped);
}

#[test]
fn desired_status_parses_stopped() {
    let parsed: DesiredWorkerStatus = serde_json::from_str("\"STOPPED\"").unwrap();
    assert_eq!(parsed, DesiredWorkerStatus::Stopped);
}
