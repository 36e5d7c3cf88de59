// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn request_fires_token() {
    let drain = DrainState::new();
    assert!(!drain.is_requested());
    assert!(!drain.token().is_cancelled());

    drain.request(DrainRequest::regular(Some(Duration::from_secs(30)), "test"));

    assert!(drain.is_requested());
    assert!(drain.token().is_cancelled());
    assert_eq!(drain.current().unwrap().kind, DrainKind::Regular);
}

#[test]
fn expedited_upgrades_regular() {
    let drain = DrainState::new();
    drain.request(DrainRequest::regular(None, "sigterm"));
    drain.request(DrainRequest::expedited("sigint"));
    assert_eq!(drain.current().unwrap().kind, DrainKind::Expedited);
}

#[test]
fn regular_never_downgrades_expedited() {
    let drain = DrainState::new();
    drain.request(DrainRequest::expedited("sigint"));
    drain.request(DrainRequest::regular(None, "sigterm"));
    let current = drain.current().unwrap();
    assert_eq!(current.kind, DrainKind::Expedited);
    assert_eq!(current.reason, "sigint");
}
