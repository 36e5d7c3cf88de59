// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fh-sessions: the per-session runtime.
//!
//! A session owns an ordered pipeline of actions for one job of one queue.
//! Exactly one action runs at a time; different sessions run concurrently on
//! their own tasks. The subprocess sandbox sits behind the [`ActionRunner`]
//! trait; entity details come from the session-scoped [`JobEntities`] cache.

pub mod entities;
pub mod queue;
pub mod runner;
pub mod runtime;

pub use entities::{EntityError, JobEntities};
pub use queue::SessionActionQueue;
pub use runner::{
    ActionContext, ActionDetails, ActionOutcome, ActionProgress, ActionRunner, OutcomeState,
    RunnerError, RunningAction,
};
pub use runtime::{
    SessionCommand, SessionConfig, SessionHandle, SessionRuntime, StatusSink, StopOutcome,
};

#[cfg(any(test, feature = "test-support"))]
pub use runner::fake::{FakeRunner, ScriptedOutcome};
