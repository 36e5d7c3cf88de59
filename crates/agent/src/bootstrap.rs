// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The startup workflow.
//!
//! Load the persisted worker id (or create a worker), assume the fleet role
//! for agent credentials, and transition the worker to STARTED. A host with
//! a persisted id never calls CreateWorker; if the service has deleted that
//! worker, the agent re-registers once when configured to.

use crate::config::AgentConfig;
use crate::persistence::WorkerInfo;
use fh_api::{Auth, RequestError, ServiceClient, WorkerIds};
use fh_core::event::{WorkerOp, EVENT_TARGET};
use fh_core::WorkerTargetStatus;
use fh_credentials::files::write_agent_credentials;
use fh_credentials::AgentCredentials;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to register worker: {0}")]
    CreateWorker(RequestError),

    #[error("failed to obtain agent credentials: {0}")]
    AssumeFleetRole(RequestError),

    #[error("failed to transition worker to STARTED: {0}")]
    Start(RequestError),

    #[error("worker {0} was deleted from the service and re-registration is disabled")]
    Deregistered(String),

    #[error(transparent)]
    Agent(Box<crate::AgentError>),

    #[error("bootstrap interrupted")]
    Interrupted,
}

/// Everything the main loop needs after a successful bootstrap.
#[derive(Debug)]
pub struct Bootstrap {
    pub ids: WorkerIds,
    pub credentials: AgentCredentials,
}

/// Run the startup workflow.
pub async fn bootstrap_worker(
    client: &dyn ServiceClient,
    config: &AgentConfig,
    interrupt: &CancellationToken,
) -> Result<Bootstrap, BootstrapError> {
    let info_path = config.worker_info_path();
    let existing =
        WorkerInfo::load(&info_path).map_err(|e| BootstrapError::Agent(Box::new(e)))?;
    let had_existing = existing.is_some();

    let worker_id = match existing {
        Some(info) => info.worker_id,
        None => register(client, config, interrupt).await?,
    };
    let mut ids = WorkerIds {
        farm_id: config.farm_id.clone(),
        fleet_id: config.fleet_id.clone(),
        worker_id,
    };
    tracing::info!(
        target: EVENT_TARGET,
        kind = "Worker",
        op = %WorkerOp::Id,
        worker_id = %ids.worker_id,
        farm_id = %ids.farm_id,
        fleet_id = %ids.fleet_id,
        "agent identity"
    );

    // Bootstrap credentials authenticate the first role assumption; every
    // later refresh uses the agent credentials themselves.
    let credentials = match fh_api::retry::assume_fleet_role_for_worker(
        client,
        &ids,
        Auth::Bootstrap,
        interrupt,
    )
    .await
    {
        Ok(credentials) => credentials,
        Err(RequestError::Interrupted) => return Err(BootstrapError::Interrupted),
        Err(error) if had_existing && is_worker_gone(&error) => {
            // The persisted worker was deleted service-side. Re-register
            // once, or surface the deregistration.
            if !config.restart_on_offline {
                return Err(BootstrapError::Deregistered(ids.worker_id.to_string()));
            }
            tracing::warn!(
                worker_id = %ids.worker_id,
                "persisted worker no longer exists; registering a new one"
            );
            ids.worker_id = register(client, config, interrupt).await?;
            fh_api::retry::assume_fleet_role_for_worker(client, &ids, Auth::Bootstrap, interrupt)
                .await
                .map_err(BootstrapError::AssumeFleetRole)?
        }
        Err(error) => return Err(BootstrapError::AssumeFleetRole(error)),
    };

    if let Err(e) = write_agent_credentials(&config.agent_credentials_path(), &credentials) {
        tracing::warn!(error = %e, "failed to persist agent credentials");
    }

    fh_api::retry::update_worker(client, &ids, WorkerTargetStatus::Started, interrupt)
        .await
        .map_err(|e| match e {
            RequestError::Interrupted => BootstrapError::Interrupted,
            other => BootstrapError::Start(other),
        })?;
    tracing::info!(
        target: EVENT_TARGET,
        kind = "Worker",
        op = %WorkerOp::Status,
        worker_id = %ids.worker_id,
        "status set to STARTED"
    );

    Ok(Bootstrap { ids, credentials: AgentCredentials::new(credentials) })
}

async fn register(
    client: &dyn ServiceClient,
    config: &AgentConfig,
    interrupt: &CancellationToken,
) -> Result<fh_core::WorkerId, BootstrapError> {
    let worker_id =
        fh_api::retry::create_worker(client, &config.farm_id, &config.fleet_id, interrupt)
            .await
            .map_err(|e| match e {
                RequestError::Interrupted => BootstrapError::Interrupted,
                other => BootstrapError::CreateWorker(other),
            })?;
    WorkerInfo { worker_id: worker_id.clone() }
        .save(&config.worker_info_path())
        .map_err(|e| BootstrapError::Agent(Box::new(e)))?;
    Ok(worker_id)
}

fn is_worker_gone(error: &RequestError) -> bool {
    matches!(
        error.service_error(),
        Some(fh_api::ServiceError::NotFound { .. })
    )
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;
