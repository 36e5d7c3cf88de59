// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-signal and termination-notice wiring.
//!
//! Three external triggers map onto drain modes: an imminent host
//! termination notice and SIGTERM both start a regular drain; an
//! interactive interrupt (SIGINT) starts an expedited one.

use crate::drain::{DrainRequest, DrainState};
use async_trait::async_trait;
use std::time::Duration;

/// Grace applied when SIGTERM gives no budget of its own.
const SIGNAL_DRAIN_GRACE: Duration = Duration::from_secs(120);

/// A source of imminent host-termination notices (spot interruptions,
/// scale-in lifecycle events). Polling and transport are the
/// implementation's concern.
#[async_trait]
pub trait TerminationMonitor: Send + Sync + 'static {
    /// Resolve when the host reports an imminent termination; the returned
    /// grace is the time left before power-off. Return `None` to report
    /// that monitoring is unavailable.
    async fn next_notice(&self) -> Option<TerminationNotice>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminationNotice {
    pub grace: Duration,
    pub reason: String,
}

/// Monitor for hosts with no termination-notice source; never fires.
pub struct NoTerminationMonitor;

#[async_trait]
impl TerminationMonitor for NoTerminationMonitor {
    async fn next_notice(&self) -> Option<TerminationNotice> {
        std::future::pending().await
    }
}

/// Spawn the signal listeners. Each fires at most one drain request.
#[cfg(unix)]
pub fn spawn_signal_handlers(drain: DrainState) {
    let terminate = drain.clone();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "could not install SIGTERM handler");
                return;
            }
        };
        if sigterm.recv().await.is_some() {
            tracing::info!("received SIGTERM; starting regular drain");
            terminate.request(DrainRequest::regular(
                Some(SIGNAL_DRAIN_GRACE),
                "received terminate signal",
            ));
        }
    });

    let interrupt = drain;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt; starting expedited drain");
            interrupt.request(DrainRequest::expedited("received interactive interrupt"));
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_signal_handlers(drain: DrainState) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            drain.request(DrainRequest::expedited("received interactive interrupt"));
        }
    });
}

/// Spawn the termination-notice watcher.
pub fn spawn_termination_monitor<M: TerminationMonitor>(monitor: M, drain: DrainState) {
    tokio::spawn(async move {
        if let Some(notice) = monitor.next_notice().await {
            tracing::info!(
                grace_s = notice.grace.as_secs(),
                reason = %notice.reason,
                "host termination notice; starting regular drain"
            );
            drain.request(DrainRequest::regular(Some(notice.grace), notice.reason));
        }
    });
}
