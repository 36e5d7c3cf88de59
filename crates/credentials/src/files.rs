// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk layout for credential material.
//!
//! Agent credentials live in a single owner-only JSON file. Each queue gets
//! a subdirectory holding the credentials JSON, an AWS config and
//! credentials file pair pointing at a credentials-process script, and the
//! script itself. The JSON is replaced atomically so a concurrent
//! credentials-process read observes either the old or the new document,
//! never a torn one.

use crate::temporary::CredentialsFile;
use crate::CredentialsError;
use fh_api::AwsCredentialsData;
use fh_core::event::{FilesystemOp, EVENT_TARGET};
use fh_core::QueueId;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// File mode for secrets only the agent user reads.
const MODE_OWNER_ONLY: u32 = 0o600;
/// File mode for secrets the job user's group may read.
const MODE_GROUP_READ: u32 = 0o640;
/// Mode for the credentials-process script (group-executable).
const MODE_SCRIPT: u32 = 0o750;
/// Mode for a queue's credential directory.
const MODE_DIR: u32 = 0o750;

/// Paths for one queue's credential material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCredentialsPaths {
    pub dir: PathBuf,
    pub credentials_json: PathBuf,
    pub aws_config: PathBuf,
    pub aws_credentials: PathBuf,
    pub process_script: PathBuf,
}

impl QueueCredentialsPaths {
    pub fn new(persistence_dir: &Path, queue_id: &QueueId) -> Self {
        let dir = persistence_dir.join("queues").join(queue_id.as_str());
        Self {
            credentials_json: dir.join("credentials.json"),
            aws_config: dir.join("config"),
            aws_credentials: dir.join("credentials"),
            process_script: dir.join("get_queue_credentials.sh"),
            dir,
        }
    }

    /// Profile name the config/credentials files install.
    pub fn profile_name(queue_id: &QueueId) -> String {
        format!("farmhand-{queue_id}")
    }
}

fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Write `contents` to `path` through a same-directory temp file and an
/// atomic rename. Readers see the previous or the new contents, never a
/// partial write, and the path is never missing in between.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<(), CredentialsError> {
    let parent = path
        .parent()
        .ok_or_else(|| CredentialsError::io(path, std::io::Error::other("no parent directory")))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| CredentialsError::io(parent, e))?;
    std::io::Write::write_all(&mut tmp, contents).map_err(|e| CredentialsError::io(path, e))?;
    set_mode(tmp.path(), mode).map_err(|e| CredentialsError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| CredentialsError::io(path, e.error))?;
    tracing::debug!(
        target: EVENT_TARGET,
        kind = "FileSystem",
        op = %FilesystemOp::Write,
        path = %path.display(),
        "replaced file atomically"
    );
    Ok(())
}

/// Serialize `value` as JSON and write it atomically.
pub fn write_json_atomic(
    path: &Path,
    value: &impl Serialize,
    mode: u32,
) -> Result<(), CredentialsError> {
    let body = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &body, mode)
}

/// Write the agent's own credentials file (owner-only).
pub fn write_agent_credentials(
    path: &Path,
    data: &AwsCredentialsData,
) -> Result<(), CredentialsError> {
    write_json_atomic(path, &CredentialsFile::from(data), MODE_OWNER_ONLY)
}

/// Create a queue's credential directory and install the full file set.
pub fn install_queue_credentials(
    paths: &QueueCredentialsPaths,
    queue_id: &QueueId,
    data: &AwsCredentialsData,
) -> Result<(), CredentialsError> {
    std::fs::create_dir_all(&paths.dir).map_err(|e| CredentialsError::io(&paths.dir, e))?;
    set_mode(&paths.dir, MODE_DIR).map_err(|e| CredentialsError::io(&paths.dir, e))?;

    write_json_atomic(&paths.credentials_json, &CredentialsFile::from(data), MODE_GROUP_READ)?;

    let script = credentials_process_script(&paths.credentials_json);
    write_atomic(&paths.process_script, script.as_bytes(), MODE_SCRIPT)?;

    let profile = QueueCredentialsPaths::profile_name(queue_id);
    let config = format!(
        "[profile {profile}]\ncredential_process={}\n",
        paths.process_script.display()
    );
    write_atomic(&paths.aws_config, config.as_bytes(), MODE_GROUP_READ)?;

    let credentials = format!(
        "[{profile}]\ncredential_process={}\n",
        paths.process_script.display()
    );
    write_atomic(&paths.aws_credentials, credentials.as_bytes(), MODE_GROUP_READ)?;

    tracing::info!(
        target: EVENT_TARGET,
        kind = "FileSystem",
        op = %FilesystemOp::Create,
        queue_id = %queue_id,
        path = %paths.dir.display(),
        "installed queue credential files"
    );
    Ok(())
}

/// Replace only the credentials JSON after a refresh. The config files and
/// script keep pointing at the same path, so running subprocesses pick up
/// the new document on their next credentials-process invocation.
pub fn update_queue_credentials(
    paths: &QueueCredentialsPaths,
    data: &AwsCredentialsData,
) -> Result<(), CredentialsError> {
    write_json_atomic(&paths.credentials_json, &CredentialsFile::from(data), MODE_GROUP_READ)
}

/// Delete a queue's credential directory.
pub fn remove_queue_credentials(paths: &QueueCredentialsPaths) -> Result<(), CredentialsError> {
    if paths.dir.exists() {
        std::fs::remove_dir_all(&paths.dir).map_err(|e| CredentialsError::io(&paths.dir, e))?;
        tracing::info!(
            target: EVENT_TARGET,
            kind = "FileSystem",
            op = %FilesystemOp::Delete,
            path = %paths.dir.display(),
            "removed queue credential files"
        );
    }
    Ok(())
}

/// Environment variables that point a subprocess's SDK at the queue
/// credentials. Only these files are ever handed to a subprocess; the
/// agent's own credentials never appear here.
pub fn subprocess_env(
    paths: &QueueCredentialsPaths,
    queue_id: &QueueId,
) -> Vec<(String, String)> {
    vec![
        ("AWS_PROFILE".into(), QueueCredentialsPaths::profile_name(queue_id)),
        ("AWS_CONFIG_FILE".into(), paths.aws_config.display().to_string()),
        (
            "AWS_SHARED_CREDENTIALS_FILE".into(),
            paths.aws_credentials.display().to_string(),
        ),
    ]
}

fn credentials_process_script(credentials_json: &Path) -> String {
    format!("#!/bin/sh\nexec cat \"{}\"\n", credentials_json.display())
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod tests;
