// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fh-credentials: the agent's two temporary credential sets.
//!
//! The agent (fleet) credentials authenticate every service call after
//! bootstrap and are never exposed to subprocesses. Queue credentials are
//! scoped to one queue, reference-counted by the sessions using them, and
//! exposed to job subprocesses only through a credentials-process script and
//! atomically replaced files.

pub mod agent;
pub mod files;
pub mod queue;
pub mod temporary;

use std::path::PathBuf;
use thiserror::Error;

pub use agent::{refresh_delay, run_agent_refresher, AgentCredentials, RefreshFailure};
pub use files::{subprocess_env, QueueCredentialsPaths};
pub use queue::{QueueCredentialsEnv, QueueCredentialsFailure, QueueCredentialsManager};
pub use temporary::CredentialsFile;

/// Errors from credential file management or acquisition.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Request(#[from] fh_api::RequestError),
}

impl CredentialsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CredentialsError::Io { path: path.into(), source }
    }
}
