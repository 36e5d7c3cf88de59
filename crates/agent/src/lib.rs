// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fh-agent: the worker lifecycle and scheduler.
//!
//! This crate is the composition root of the agent core. The embedding
//! binary supplies the two external capabilities (the concrete
//! [`fh_api::ServiceClient`] transport and the [`fh_sessions::ActionRunner`]
//! sandbox) and calls [`worker::Worker::run`]; everything else, from
//! bootstrap through drain, lives here.

pub mod bootstrap;
pub mod config;
pub mod drain;
pub mod logging;
pub mod persistence;
pub mod scheduler;
pub mod signals;
pub mod updates;
pub mod worker;

use thiserror::Error;

pub use config::AgentConfig;
pub use drain::{DrainKind, DrainRequest, DrainState};
pub use worker::Worker;

/// Top-level agent failures.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] bootstrap::BootstrapError),

    #[error("service request failed: {0}")]
    Request(#[from] fh_api::RequestError),

    #[error("credentials error: {0}")]
    Credentials(#[from] fh_credentials::CredentialsError),

    #[error("io error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("the service no longer recognizes this worker")]
    WorkerDeregistered,

    #[error("agent credentials could not be kept valid: {0}")]
    CredentialsExpired(String),
}
