// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identity persistence.
//!
//! A single small JSON file records the worker id across restarts. It is
//! written once when the worker is created and only read afterwards; an
//! agent that finds it skips CreateWorker entirely.

use crate::AgentError;
use fh_core::event::{WorkerOp, EVENT_TARGET};
use fh_core::WorkerId;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: WorkerId,
}

impl WorkerInfo {
    /// Load the persisted worker identity, if any.
    pub fn load(path: &Path) -> Result<Option<WorkerInfo>, AgentError> {
        let body = match std::fs::read_to_string(path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AgentError::Io { path: path.to_path_buf(), source: e }),
        };
        let info: WorkerInfo = serde_json::from_str(&body).map_err(|e| AgentError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        tracing::info!(
            target: EVENT_TARGET,
            kind = "Worker",
            op = %WorkerOp::Load,
            worker_id = %info.worker_id,
            "loaded persisted worker identity"
        );
        Ok(Some(info))
    }

    /// Persist the worker identity. Called once, at creation.
    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::Io { path: parent.to_path_buf(), source: e })?;
        }
        let body = serde_json::to_string_pretty(self).map_err(|e| AgentError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        std::fs::write(path, body)
            .map_err(|e| AgentError::Io { path: path.to_path_buf(), source: e })?;
        tracing::info!(
            target: EVENT_TARGET,
            kind = "Worker",
            op = %WorkerOp::Create,
            worker_id = %self.worker_id,
            path = %path.display(),
            "persisted worker identity"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "persistence_tests.rs"]
mod tests;
