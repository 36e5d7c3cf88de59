// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drain coordination.
//!
//! A drain request carries its mode and grace budget. The cancellation
//! token interrupts every in-flight service call and sleep; the scheduler
//! reads the request when its loop unwinds. An expedited request upgrades a
//! pending regular one, never the reverse.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Minimum budget for running a regular drain; below this the agent
/// switches to expedited.
pub const MIN_REGULAR_DRAIN_BUDGET: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainKind {
    Regular,
    Expedited,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrainRequest {
    pub kind: DrainKind,
    /// Wall-clock budget for winding sessions down. `None` means the
    /// configured default.
    pub grace: Option<Duration>,
    pub reason: String,
}

impl DrainRequest {
    pub fn regular(grace: Option<Duration>, reason: impl Into<String>) -> Self {
        Self { kind: DrainKind::Regular, grace, reason: reason.into() }
    }

    pub fn expedited(reason: impl Into<String>) -> Self {
        Self { kind: DrainKind::Expedited, grace: None, reason: reason.into() }
    }
}

/// Shared drain state: the pending request plus the token that interrupts
/// suspension points.
#[derive(Clone, Default)]
pub struct DrainState {
    request: Arc<Mutex<Option<DrainRequest>>>,
    token: CancellationToken,
}

impl DrainState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a drain request and fire the token. A regular request never
    /// downgrades a pending expedited one.
    pub fn request(&self, request: DrainRequest) {
        {
            let mut current = self.request.lock();
            match current.as_ref() {
                Some(existing)
                    if existing.kind == DrainKind::Expedited
                        && request.kind == DrainKind::Regular => {}
                _ => {
                    tracing::info!(
                        kind = ?request.kind,
                        reason = %request.reason,
                        "drain requested"
                    );
                    *current = Some(request);
                }
            }
        }
        self.token.cancel();
    }

    pub fn current(&self) -> Option<DrainRequest> {
        self.request.lock().clone()
    }

    pub fn is_requested(&self) -> bool {
        self.request.lock().is_some()
    }

    /// Token fired on any drain request. Cloned into service calls so
    /// retry loops unwind promptly.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
#[path = "drain_tests.rs"]
mod tests;
