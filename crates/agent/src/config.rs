// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration.
//!
//! CLI arguments override environment variables (FH_*), which override the
//! defaults. The embedding binary calls `AgentConfig::parse()`.

use clap::Parser;
use fh_api::PosixUser;
use fh_core::{FarmId, FleetId};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one agent instance.
#[derive(Debug, Clone, Parser)]
#[command(name = "farmhand-agent", about = "Worker agent for a farmhand compute farm")]
pub struct AgentConfig {
    /// The farm this worker belongs to.
    #[arg(long, env = "FH_FARM_ID")]
    pub farm_id: FarmId,

    /// The fleet this worker belongs to.
    #[arg(long, env = "FH_FLEET_ID")]
    pub fleet_id: FleetId,

    /// Directory for worker identity and credential files.
    #[arg(long, env = "FH_PERSISTENCE_DIR", default_value = "/var/lib/farmhand")]
    pub persistence_dir: PathBuf,

    /// Base directory for per-session log files
    /// (<logs_dir>/<queue_id>/<session_id>.log). Omit to disable local
    /// session logs.
    #[arg(long, env = "FH_LOGS_DIR")]
    pub logs_dir: Option<PathBuf>,

    /// Root directory for session working directories.
    #[arg(long, env = "FH_SESSIONS_DIR", default_value = "/sessions")]
    pub sessions_dir: PathBuf,

    /// Run all session actions as the agent's own user instead of the
    /// queue-configured user.
    #[arg(long, env = "FH_RUN_AS_AGENT", default_value_t = false)]
    pub run_as_agent: bool,

    /// Override user for session subprocesses, as "user:group".
    #[arg(long, env = "FH_JOB_USER", value_parser = parse_posix_user)]
    pub job_user: Option<PosixUser>,

    /// Keep session working directories after teardown.
    #[arg(long, env = "FH_RETAIN_SESSION_DIR", default_value_t = false)]
    pub retain_session_dir: bool,

    /// Call DeleteWorker after a clean shutdown.
    #[arg(long, env = "FH_DELETE_ON_SHUTDOWN", default_value_t = false)]
    pub delete_worker_on_shutdown: bool,

    /// Re-run the startup workflow when the service reports the worker
    /// offline or deregistered, instead of exiting.
    #[arg(long, env = "FH_RESTART_ON_OFFLINE", default_value_t = true)]
    pub restart_on_offline: bool,

    /// Grace period in seconds for canceling a running action.
    #[arg(long, env = "FH_CANCEL_GRACE_SECONDS", default_value_t = 30)]
    pub cancel_grace_seconds: u64,

    /// Wall-clock budget in seconds for a regular worker-initiated drain.
    #[arg(long, env = "FH_DRAIN_GRACE_SECONDS", default_value_t = 120)]
    pub drain_grace_seconds: u64,
}

fn parse_posix_user(value: &str) -> Result<PosixUser, String> {
    match value.split_once(':') {
        Some((user, group)) if !user.is_empty() && !group.is_empty() => {
            Ok(PosixUser { user: user.to_string(), group: group.to_string() })
        }
        _ => Err(format!("expected \"user:group\", got {value:?}")),
    }
}

impl AgentConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_seconds)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_seconds)
    }

    /// Path of the persisted worker identity file.
    pub fn worker_info_path(&self) -> PathBuf {
        self.persistence_dir.join("worker.json")
    }

    /// Path of the agent's own credentials file.
    pub fn agent_credentials_path(&self) -> PathBuf {
        self.persistence_dir.join("worker_credentials.json")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
