// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types for the seven service operations.

use chrono::{DateTime, Utc};
use fh_core::{
    ActionId, ActionKind, CompletedStatus, DesiredWorkerStatus, EnvironmentId, FarmId, FleetId,
    JobId, QueueId, SessionId, StepId, TaskParameter, WorkerId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// The identity triple every post-bootstrap operation is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIds {
    pub farm_id: FarmId,
    pub fleet_id: FleetId,
    pub worker_id: WorkerId,
}

/// A set of temporary AWS credentials as returned by the assume-role
/// operations. Interpretation (caching, refresh, on-disk layout) lives in
/// fh-credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsCredentialsData {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

/// One action entry in an assigned session, order-significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedAction {
    #[serde(rename = "sessionActionId")]
    pub action_id: ActionId,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// Log configuration handed down by the service for a session or the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfiguration {
    pub log_driver: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A session assignment from an UpdateWorkerSchedule response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedSession {
    pub queue_id: QueueId,
    pub job_id: JobId,
    #[serde(rename = "sessionActions")]
    pub actions: Vec<AssignedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,
}

/// UpdateWorkerSchedule success payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    #[serde(default)]
    pub assigned_sessions: BTreeMap<SessionId, AssignedSession>,
    #[serde(default)]
    pub cancel_session_actions: BTreeMap<SessionId, Vec<ActionId>>,
    pub update_interval_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_worker_status: Option<DesiredWorkerStatus>,
}

impl ScheduleResponse {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_seconds)
    }
}

/// Status update for one session action in an outgoing
/// UpdateWorkerSchedule request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedActionInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_status: Option<CompletedStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Job-description schema versions this agent knows how to run.
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["jobtemplate-2023-09"];

/// True when the agent can execute templates of this schema version.
pub fn is_supported_schema(version: &str) -> bool {
    SUPPORTED_SCHEMA_VERSIONS.contains(&version)
}

/// Reference to a job entity that a session can request details for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityRef {
    JobDetails {
        job_id: JobId,
    },
    StepDetails {
        job_id: JobId,
        step_id: StepId,
    },
    EnvironmentDetails {
        job_id: JobId,
        environment_id: EnvironmentId,
    },
    JobAttachmentDetails {
        job_id: JobId,
    },
}

impl EntityRef {
    /// Cache key, unique within one session's entity cache.
    pub fn cache_key(&self) -> String {
        match self {
            EntityRef::JobDetails { job_id } => job_id.to_string(),
            EntityRef::StepDetails { step_id, .. } => step_id.to_string(),
            EntityRef::EnvironmentDetails { environment_id, .. } => environment_id.to_string(),
            EntityRef::JobAttachmentDetails { job_id } => format!("JA({job_id})"),
        }
    }

    pub fn is_job_details(&self) -> bool {
        matches!(self, EntityRef::JobDetails { .. })
    }
}

/// How session action subprocesses should be run, per the queue's
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunAs {
    QueueConfiguredUser,
    WorkerAgentUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosixUser {
    pub user: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunAsUser {
    pub run_as: RunAs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posix: Option<PosixUser>,
}

/// Path remapping rule from the submitting host's layout to this worker's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMappingRule {
    pub source_path_format: String,
    pub source_path: String,
    pub destination_path: String,
}

/// Queue-level S3 location for job attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAttachmentQueueSettings {
    pub s3_bucket_name: String,
    pub root_prefix: String,
}

/// jobDetails entity: everything needed to set a session up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailsData {
    pub job_id: JobId,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, TaskParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_run_as_user: Option<JobRunAsUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_mapping_rules: Vec<PathMappingRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_attachment_settings: Option<JobAttachmentQueueSettings>,
}

/// stepDetails entity: the step template for a task-run action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDetailsData {
    pub job_id: JobId,
    pub step_id: StepId,
    pub schema_version: String,
    pub template: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<StepId>,
}

/// environmentDetails entity: the environment template for env-enter/exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDetailsData {
    pub job_id: JobId,
    pub environment_id: EnvironmentId,
    pub schema_version: String,
    pub template: serde_json::Value,
}

/// Manifest configuration for one job-attachment root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestProperties {
    pub root_path: String,
    pub root_path_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system_location_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_manifest_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_manifest_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_relative_directories: Vec<String>,
}

/// jobAttachmentDetails entity: inputs/outputs to synchronize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAttachmentDetailsData {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<ManifestProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system: Option<String>,
}

/// A successfully fetched entity, tagged like the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityData {
    JobDetails(JobDetailsData),
    StepDetails(StepDetailsData),
    EnvironmentDetails(EnvironmentDetailsData),
    JobAttachmentDetails(JobAttachmentDetailsData),
}

impl EntityData {
    /// Cache key matching [`EntityRef::cache_key`].
    pub fn cache_key(&self) -> String {
        match self {
            EntityData::JobDetails(d) => d.job_id.to_string(),
            EntityData::StepDetails(d) => d.step_id.to_string(),
            EntityData::EnvironmentDetails(d) => d.environment_id.to_string(),
            EntityData::JobAttachmentDetails(d) => format!("JA({})", d.job_id),
        }
    }
}

/// Per-entity error codes in a BatchGetJobEntity response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityErrorCode {
    NotFound,
    Validation,
    InternalServer,
    MaxPayloadSizeExceeded,
}

fh_core::simple_display! {
    EntityErrorCode {
        NotFound => "NotFound",
        Validation => "Validation",
        InternalServer => "InternalServer",
        MaxPayloadSizeExceeded => "MaxPayloadSizeExceeded",
    }
}

/// A per-entity failure in a BatchGetJobEntity response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub entity: EntityRef,
    pub code: EntityErrorCode,
    pub message: String,
}

/// BatchGetJobEntity success payload: per-entity data or per-entity errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchEntityResponse {
    #[serde(default)]
    pub entities: Vec<EntityData>,
    #[serde(default)]
    pub errors: Vec<EntityFailure>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
