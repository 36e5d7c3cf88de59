// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent's own (fleet) credentials: holder and refresher task.
//!
//! Exactly one active set exists after bootstrap. The refresher wakes at
//! `expiry − 15min` (clamped at least 30s out), refreshes with the current
//! agent credentials, and republishes the new set. It never falls back to
//! bootstrap credentials once the agent is online.

use crate::files::write_agent_credentials;
use crate::temporary::is_expired;
use chrono::{DateTime, Utc};
use fh_api::{Auth, AwsCredentialsData, RequestError, ServiceClient, ServiceError, WorkerIds};
use fh_core::event::{CredsOp, EVENT_TARGET};
use fh_core::Clock;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Refresh this long before expiry.
const REFRESH_LEAD: Duration = Duration::from_secs(15 * 60);
/// Never schedule a refresh sooner than this.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(30);

/// Shared, snapshot-on-read holder for the active agent credentials.
///
/// Readers clone the current set out under a short read lock; no lock is
/// ever held across I/O.
#[derive(Debug, Clone)]
pub struct AgentCredentials {
    inner: Arc<RwLock<AwsCredentialsData>>,
}

impl AgentCredentials {
    pub fn new(initial: AwsCredentialsData) -> Self {
        Self { inner: Arc::new(RwLock::new(initial)) }
    }

    /// Non-blocking snapshot of the current credential set.
    pub fn snapshot(&self) -> AwsCredentialsData {
        self.inner.read().clone()
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.inner.read().expiration
    }

    pub fn replace(&self, new: AwsCredentialsData) {
        *self.inner.write() = new;
    }
}

/// Terminal refresher outcomes that require a drain.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshFailure {
    /// The credentials expired and could not be refreshed.
    Expired { expiry: DateTime<Utc> },
    /// The service rejected the refresh in a way retries cannot fix.
    Fatal { message: String },
}

/// Delay until the next refresh attempt: `expiry − 15min` from now, but
/// always at least 30s in the future.
pub fn refresh_delay(now: DateTime<Utc>, expiry: DateTime<Utc>) -> Duration {
    let until_lead = (expiry - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .saturating_sub(REFRESH_LEAD);
    until_lead.max(MIN_REFRESH_DELAY)
}

/// Run the agent-credentials refresher until `stop` fires or a terminal
/// failure is reported through `failure_tx`.
pub async fn run_agent_refresher<C: Clock>(
    client: Arc<dyn ServiceClient>,
    ids: WorkerIds,
    credentials: AgentCredentials,
    credentials_path: PathBuf,
    clock: C,
    stop: CancellationToken,
    failure_tx: mpsc::UnboundedSender<RefreshFailure>,
) {
    loop {
        let delay = refresh_delay(clock.now_utc(), credentials.expiration());
        tracing::info!(
            target: EVENT_TARGET,
            kind = "AwsCreds",
            op = %CredsOp::Refresh,
            resource = %ids.worker_id,
            delay_s = delay.as_secs(),
            "refresh scheduled"
        );
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match fh_api::retry::assume_fleet_role_for_worker(&*client, &ids, Auth::Agent, &stop).await
        {
            Ok(new) => {
                if let Err(e) = write_agent_credentials(&credentials_path, &new) {
                    tracing::warn!(error = %e, "failed to persist refreshed agent credentials");
                }
                tracing::info!(
                    target: EVENT_TARGET,
                    kind = "AwsCreds",
                    op = %CredsOp::Refresh,
                    resource = %ids.worker_id,
                    expiry = %new.expiration,
                    "agent credentials refreshed"
                );
                credentials.replace(new);
            }
            Err(RequestError::Interrupted) => return,
            Err(error) => {
                // A worker-scoped conflict means instance-profile credentials
                // are shadowing ours; keep the cached set and try again.
                let worker_conflict = matches!(
                    error.service_error(),
                    Some(ServiceError::Conflict { resource_id, .. })
                        if resource_id == ids.worker_id.as_str()
                );
                if worker_conflict {
                    tracing::warn!(
                        target: EVENT_TARGET,
                        kind = "AwsCreds",
                        op = %CredsOp::Refresh,
                        resource = %ids.worker_id,
                        "worker status conflict during refresh; retrying with cached credentials"
                    );
                    continue;
                }

                let now = clock.now_utc();
                let snapshot = credentials.snapshot();
                if is_expired(&snapshot, now) {
                    tracing::error!(
                        target: EVENT_TARGET,
                        kind = "AwsCreds",
                        op = %CredsOp::Expired,
                        resource = %ids.worker_id,
                        "agent credentials have expired"
                    );
                    let _ = failure_tx.send(RefreshFailure::Expired {
                        expiry: snapshot.expiration,
                    });
                    return;
                }

                tracing::error!(
                    target: EVENT_TARGET,
                    kind = "AwsCreds",
                    op = %CredsOp::Refresh,
                    resource = %ids.worker_id,
                    error = %error,
                    "fatal error refreshing agent credentials"
                );
                let _ = failure_tx.send(RefreshFailure::Fatal { message: error.to_string() });
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
