// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing subscriber setup for the agent process.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber: structured fields, env-filterable via
/// `FH_LOG` (default `info`).
pub fn init() {
    let filter = EnvFilter::try_from_env("FH_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
