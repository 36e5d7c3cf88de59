// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Utc;

fn sample() -> AwsCredentialsData {
    AwsCredentialsData {
        access_key_id: "AKIA123".into(),
        secret_access_key: "secret".into(),
        session_token: "token".into(),
        expiration: Utc::now() + chrono::Duration::minutes(60),
    }
}

#[test]
fn paths_layout() {
    let paths = QueueCredentialsPaths::new(Path::new("/var/lib/farmhand"), &QueueId::new("queue-1"));
    assert_eq!(paths.dir, Path::new("/var/lib/farmhand/queues/queue-1"));
    assert_eq!(paths.credentials_json, paths.dir.join("credentials.json"));
    assert_eq!(paths.aws_config, paths.dir.join("config"));
    assert_eq!(paths.aws_credentials, paths.dir.join("credentials"));
}

#[test]
fn install_writes_full_file_set() {
    let tmp = tempfile::tempdir().unwrap();
    let queue_id = QueueId::new("queue-1");
    let paths = QueueCredentialsPaths::new(tmp.path(), &queue_id);

    install_queue_credentials(&paths, &queue_id, &sample()).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.credentials_json).unwrap()).unwrap();
    assert_eq!(json["Version"], 1);
    assert_eq!(json["AccessKeyId"], "AKIA123");

    let config = std::fs::read_to_string(&paths.aws_config).unwrap();
    assert!(config.starts_with("[profile farmhand-queue-1]"));
    assert!(config.contains("credential_process="));

    let creds = std::fs::read_to_string(&paths.aws_credentials).unwrap();
    assert!(creds.starts_with("[farmhand-queue-1]"));

    let script = std::fs::read_to_string(&paths.process_script).unwrap();
    assert!(script.starts_with("#!/bin/sh"));
    assert!(script.contains("credentials.json"));
}

#[cfg(unix)]
#[test]
fn install_sets_restrictive_modes() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let queue_id = QueueId::new("queue-1");
    let paths = QueueCredentialsPaths::new(tmp.path(), &queue_id);
    install_queue_credentials(&paths, &queue_id, &sample()).unwrap();

    let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&paths.credentials_json), 0o640);
    assert_eq!(mode(&paths.process_script), 0o750);
    assert_eq!(mode(&paths.dir), 0o750);
}

#[test]
fn update_replaces_json_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let queue_id = QueueId::new("queue-1");
    let paths = QueueCredentialsPaths::new(tmp.path(), &queue_id);
    install_queue_credentials(&paths, &queue_id, &sample()).unwrap();

    let mut refreshed = sample();
    refreshed.access_key_id = "AKIA456".into();
    update_queue_credentials(&paths, &refreshed).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.credentials_json).unwrap()).unwrap();
    assert_eq!(json["AccessKeyId"], "AKIA456");
    // Config files are untouched by a refresh.
    assert!(std::fs::read_to_string(&paths.aws_config).unwrap().contains("credential_process="));
}

#[test]
fn remove_deletes_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let queue_id = QueueId::new("queue-1");
    let paths = QueueCredentialsPaths::new(tmp.path(), &queue_id);
    install_queue_credentials(&paths, &queue_id, &sample()).unwrap();

    remove_queue_credentials(&paths).unwrap();
    assert!(!paths.dir.exists());
    // Idempotent.
    remove_queue_credentials(&paths).unwrap();
}

#[test]
fn agent_credentials_file_is_owner_only() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("worker_credentials.json");
    write_agent_credentials(&path, &sample()).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["SessionToken"], "token");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

#[test]
fn subprocess_env_points_at_queue_files_only() {
    let paths = QueueCredentialsPaths::new(Path::new("/p"), &QueueId::new("queue-1"));
    let env = subprocess_env(&paths, &QueueId::new("queue-1"));
    let keys: Vec<_> = env.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["AWS_PROFILE", "AWS_CONFIG_FILE", "AWS_SHARED_CREDENTIALS_FILE"]);
    assert!(env.iter().all(|(_, v)| !v.contains("worker_credentials")));
}

#[test]
fn write_atomic_overwrites_existing() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("file.json");
    write_atomic(&path, b"old", 0o600).unwrap();
    write_atomic(&path, b"new", 0o600).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
}
