// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The outgoing status-update map.
//!
//! Session runtimes report [`ActionUpdate`]s here; the scheduler snapshots
//! the map into an UpdateWorkerSchedule payload and commits the snapshot
//! only after the call succeeds. An update that arrives while the call is
//! in flight survives the commit, so a terminal status can never be lost.

use chrono::{DateTime, Utc};
use fh_api::{AssignedAction, UpdatedActionInfo};
use fh_core::{
    ActionId, ActionUpdate, CompletedStatus, SessionId, PROGRESS_MESSAGE_MAX_CHARS,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::Notify;

/// What the snapshot saw for one action; used to commit deletions only when
/// nothing newer arrived in the meantime.
#[derive(Debug, Clone, PartialEq)]
enum Fingerprint {
    Terminal(CompletedStatus),
    Running(Option<DateTime<Utc>>),
}

fn fingerprint(update: &ActionUpdate) -> Fingerprint {
    match update.completed_status {
        Some(status) => Fingerprint::Terminal(status),
        None => Fingerprint::Running(update.updated_at),
    }
}

/// An in-flight snapshot, to be committed after a successful call.
pub struct UpdateTx(Vec<(ActionId, Fingerprint)>);

#[derive(Default)]
pub struct PendingUpdates {
    map: Mutex<BTreeMap<ActionId, ActionUpdate>>,
    wakeup: Notify,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an update, waking the scheduler for terminal failures.
    pub fn report(&self, update: ActionUpdate) {
        let wake = update.needs_immediate_report();
        {
            let mut map = self.map.lock();
            // A terminal status is never downgraded by a late progress update.
            if let Some(existing) = map.get(&update.action_id) {
                if existing.is_terminal() && !update.is_terminal() {
                    return;
                }
            }
            map.insert(update.action_id.clone(), update);
        }
        if wake {
            self.wakeup.notify_one();
        }
    }

    /// Wake the scheduler loop (idle session, drain, failure).
    pub fn wake(&self) {
        self.wakeup.notify_one();
    }

    /// Wait until something wakes the scheduler.
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn has_terminal_pending(&self) -> bool {
        self.map.lock().values().any(|u| u.is_terminal())
    }

    pub fn contains_terminal(&self, action_id: &ActionId) -> bool {
        self.map
            .lock()
            .get(action_id)
            .map(|u| u.is_terminal())
            .unwrap_or(false)
    }

    /// Snapshot the map into an outgoing payload plus the commit token.
    pub fn snapshot(&self) -> (BTreeMap<ActionId, UpdatedActionInfo>, UpdateTx) {
        let map = self.map.lock();
        let payload = map.iter().map(|(id, u)| (id.clone(), to_info(u))).collect();
        let tx = UpdateTx(map.iter().map(|(id, u)| (id.clone(), fingerprint(u))).collect());
        (payload, tx)
    }

    /// Remove every entry the snapshot reported, unless a newer update
    /// replaced it while the request was in flight.
    pub fn commit(&self, tx: UpdateTx) {
        let mut map = self.map.lock();
        for (action_id, seen) in tx.0 {
            if map.get(&action_id).map(fingerprint) == Some(seen) {
                map.remove(&action_id);
            }
        }
    }

    /// Fail a brand-new session's actions: the first one FAILED with the
    /// message, everything after it NEVER_ATTEMPTED. Used when session
    /// setup fails before any action ran (bad job details, log dir, user
    /// resolution, queue credentials).
    pub fn fail_all_actions(&self, actions: &[AssignedAction], message: &str, now: DateTime<Utc>) {
        for (index, action) in actions.iter().enumerate() {
            let update = if index == 0 {
                ActionUpdate::completed(
                    action.action_id.clone(),
                    CompletedStatus::Failed,
                    now,
                    now,
                    Some(message.to_string()),
                    None,
                )
            } else {
                ActionUpdate::never_attempted(action.action_id.clone(), Some(message.to_string()))
            };
            self.report(update);
        }
        self.wake();
    }

    /// Return actions the service re-listed for a session whose task has
    /// already exited: first FAILED, environment exits FAILED, the rest
    /// NEVER_ATTEMPTED. Entries the session reported before dying win.
    pub fn reconcile_stopped_session(
        &self,
        actions: &[AssignedAction],
        message: &str,
        now: DateTime<Utc>,
    ) {
        for (index, action) in actions.iter().enumerate() {
            if self.map.lock().contains_key(&action.action_id) {
                continue;
            }
            let update = if index == 0 || action.kind.is_env_exit() {
                ActionUpdate::completed(
                    action.action_id.clone(),
                    CompletedStatus::Failed,
                    now,
                    now,
                    Some(message.to_string()),
                    None,
                )
            } else {
                ActionUpdate::never_attempted(action.action_id.clone(), Some(message.to_string()))
            };
            self.report(update);
        }
        self.wake();
    }
}

impl fh_sessions::StatusSink for PendingUpdates {
    fn report(&self, _session_id: &SessionId, update: ActionUpdate) {
        PendingUpdates::report(self, update);
    }

    fn session_idle(&self, _session_id: &SessionId) {
        self.wake();
    }
}

/// Convert an update to the wire shape: progress clamped to [0, 100],
/// message truncated to the API ceiling, updatedAt only for non-terminal
/// updates.
fn to_info(update: &ActionUpdate) -> UpdatedActionInfo {
    UpdatedActionInfo {
        completed_status: update.completed_status,
        process_exit_code: update.exit_code,
        progress_message: update
            .message
            .as_ref()
            .map(|m| truncate_chars(m, PROGRESS_MESSAGE_MAX_CHARS)),
        progress_percent: update.progress_percent.map(|p| p.clamp(0.0, 100.0)),
        started_at: update.started_at,
        ended_at: update.ended_at,
        updated_at: if update.is_terminal() { None } else { update.updated_at },
    }
}

fn truncate_chars(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((boundary, _)) => message[..boundary].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
#[path = "updates_tests.rs"]
mod tests;
