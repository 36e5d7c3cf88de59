// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ordered queue of actions assigned to one session.
//!
//! The scheduler appends at the tail (via `replace`, which also preserves
//! service-side reordering); the runtime pops from the head. Cancelation
//! removes queued entries; environment-exit actions are exempt from bulk
//! cancelation because an entered environment must always be exited.

use fh_api::{AssignedAction, EntityRef};
use fh_core::{ActionId, ActionKind, JobId};
use std::collections::HashSet;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct SessionActionQueue {
    actions: VecDeque<AssignedAction>,
}

impl SessionActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Remove and return the action at the head of the queue.
    pub fn pop_front(&mut self) -> Option<AssignedAction> {
        self.actions.pop_front()
    }

    /// Replace the queue with the service's current assignment order.
    ///
    /// Supports adding new actions and keeping/reordering existing ones.
    /// The currently running action (if any) is excluded. Cancels must be
    /// routed before calling this.
    pub fn replace(&mut self, actions: Vec<AssignedAction>, running: Option<&ActionId>) {
        let known: HashSet<ActionId> =
            self.actions.iter().map(|a| a.action_id.clone()).collect();
        self.actions = actions
            .into_iter()
            .filter(|a| Some(&a.action_id) != running)
            .inspect(|a| {
                if !known.contains(&a.action_id) {
                    tracing::debug!(action_id = %a.action_id, kind = %a.kind, "enqueued action");
                }
            })
            .collect();
    }

    /// Remove one queued action. Returns the entry if it was queued.
    pub fn cancel(&mut self, action_id: &ActionId) -> Option<AssignedAction> {
        let index = self.actions.iter().position(|a| &a.action_id == action_id)?;
        self.actions.remove(index)
    }

    /// Remove the given actions, returning the removed entries in queue
    /// order.
    pub fn cancel_many(&mut self, action_ids: &HashSet<ActionId>) -> Vec<AssignedAction> {
        let (keep, removed): (VecDeque<_>, VecDeque<_>) = self
            .actions
            .drain(..)
            .partition(|a| !action_ids.contains(&a.action_id));
        self.actions = keep;
        removed.into()
    }

    /// Remove every queued action except environment exits, returning the
    /// removed entries in order. Used when an action ends unsuccessfully:
    /// the removed actions are reported NEVER_ATTEMPTED, while envExits stay
    /// queued and still run.
    pub fn cancel_all_except_env_exits(&mut self) -> Vec<AssignedAction> {
        let (keep, removed): (VecDeque<_>, VecDeque<_>) =
            self.actions.drain(..).partition(|a| a.kind.is_env_exit());
        self.actions = keep;
        removed.into()
    }

    /// Remove every queued action, returning the removed entries in order.
    pub fn drain_all(&mut self) -> Vec<AssignedAction> {
        self.actions.drain(..).collect()
    }

    /// Entity references needed to run everything currently queued,
    /// deduplicated in queue order. Used to warm the entity cache.
    pub fn entity_refs(&self, job_id: &JobId) -> Vec<EntityRef> {
        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        for action in &self.actions {
            let entity_ref = match &action.kind {
                ActionKind::EnvEnter { environment_id } | ActionKind::EnvExit { environment_id } => {
                    EntityRef::EnvironmentDetails {
                        job_id: job_id.clone(),
                        environment_id: environment_id.clone(),
                    }
                }
                ActionKind::TaskRun { step_id, .. } => EntityRef::StepDetails {
                    job_id: job_id.clone(),
                    step_id: step_id.clone(),
                },
                ActionKind::SyncInputJobAttachments { step_id: Some(step_id) } => {
                    EntityRef::StepDetails { job_id: job_id.clone(), step_id: step_id.clone() }
                }
                ActionKind::SyncInputJobAttachments { step_id: None } => {
                    EntityRef::JobAttachmentDetails { job_id: job_id.clone() }
                }
            };
            if seen.insert(entity_ref.cache_key()) {
                refs.push(entity_ref);
            }
        }
        refs
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
