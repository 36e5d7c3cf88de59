// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-scoped cache over BatchGetJobEntity.
//!
//! Requests are batched up to the service's per-request ceiling. Results and
//! per-entity errors are memoized for the session's lifetime; an entity the
//! service rejects with MaxPayloadSizeExceeded is re-queued and fetched in a
//! later, smaller batch rather than being failed.

use fh_api::{
    BatchEntityResponse, EntityData, EntityErrorCode, EntityRef, EnvironmentDetailsData,
    JobAttachmentDetailsData, JobDetailsData, RequestError, ServiceClient, StepDetailsData,
    WorkerIds,
};
use fh_core::{EnvironmentId, JobId, StepId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Maximum identifiers in one BatchGetJobEntity request.
const MAX_ENTITIES_PER_REQUEST: usize = 25;

/// Failure to produce details for one entity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntityError {
    #[error("entity {key} failed: {code}: {message}")]
    Entity { key: String, code: EntityErrorCode, message: String },

    #[error("entity fetch failed: {0}")]
    Request(#[from] RequestError),

    #[error("no details returned for entity {key}")]
    Missing { key: String },

    #[error("service returned the wrong entity type for {key}")]
    WrongType { key: String },
}

enum EntityRecord {
    Data(EntityData),
    Error { code: EntityErrorCode, message: String },
}

/// Per-session entity cache. Entries are immutable once written and live
/// until the session is torn down.
pub struct JobEntities {
    client: Arc<dyn ServiceClient>,
    ids: WorkerIds,
    job_id: JobId,
    records: Mutex<HashMap<String, EntityRecord>>,
}

impl JobEntities {
    pub fn new(client: Arc<dyn ServiceClient>, ids: WorkerIds, job_id: JobId) -> Self {
        Self { client, ids, job_id, records: Mutex::new(HashMap::new()) }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Fetch and memoize details for the given refs, batching requests.
    ///
    /// Per-entity errors are memoized too (except MaxPayloadSizeExceeded,
    /// which re-queues the entity for a smaller batch). A transport-level
    /// failure aborts the warm-up; callers treat that as best-effort.
    pub async fn cache_entities(
        &self,
        refs: Vec<EntityRef>,
        interrupt: &CancellationToken,
    ) -> Result<(), RequestError> {
        let mut pending: VecDeque<EntityRef> = refs
            .into_iter()
            .filter(|r| !self.records.lock().contains_key(&r.cache_key()))
            .collect();
        // Entities that already bounced once on payload size get a batch of
        // their own the second time around.
        let mut requeued: HashMap<String, u32> = HashMap::new();

        while let Some(first) = pending.pop_front() {
            let mut batch = vec![first];
            let solo = requeued.contains_key(&batch[0].cache_key());
            while !solo && batch.len() < MAX_ENTITIES_PER_REQUEST {
                let next_is_fresh =
                    matches!(pending.front(), Some(next) if !requeued.contains_key(&next.cache_key()));
                if !next_is_fresh {
                    break;
                }
                if let Some(next) = pending.pop_front() {
                    batch.push(next);
                }
            }

            let response =
                fh_api::retry::batch_get_job_entity(&*self.client, &self.ids, &batch, interrupt)
                    .await?;
            self.absorb(response, &batch, &mut pending, &mut requeued);
        }
        Ok(())
    }

    fn absorb(
        &self,
        response: BatchEntityResponse,
        batch: &[EntityRef],
        pending: &mut VecDeque<EntityRef>,
        requeued: &mut HashMap<String, u32>,
    ) {
        let mut records = self.records.lock();
        for entity in response.entities {
            records.insert(entity.cache_key(), EntityRecord::Data(entity));
        }
        for failure in response.errors {
            let key = failure.entity.cache_key();
            if failure.code == EntityErrorCode::MaxPayloadSizeExceeded {
                let attempts = requeued.entry(key.clone()).or_insert(0);
                *attempts += 1;
                if *attempts > 1 {
                    // Even a singleton batch exceeded the ceiling; memoize
                    // the error so the action fails with a clear reason.
                    records.insert(
                        key,
                        EntityRecord::Error { code: failure.code, message: failure.message },
                    );
                } else if let Some(original) =
                    batch.iter().find(|r| r.cache_key() == failure.entity.cache_key())
                {
                    pending.push_back(original.clone());
                }
                continue;
            }
            tracing::error!(
                key = %key,
                code = %failure.code,
                message = %failure.message,
                "entity fetch failed"
            );
            records.insert(key, EntityRecord::Error { code: failure.code, message: failure.message });
        }
    }

    async fn request(
        &self,
        entity_ref: EntityRef,
        interrupt: &CancellationToken,
    ) -> Result<EntityData, EntityError> {
        let key = entity_ref.cache_key();
        if let Some(result) = self.lookup(&key) {
            return result;
        }
        self.cache_entities(vec![entity_ref], interrupt).await?;
        self.lookup(&key).unwrap_or(Err(EntityError::Missing { key }))
    }

    fn lookup(&self, key: &str) -> Option<Result<EntityData, EntityError>> {
        let records = self.records.lock();
        match records.get(key) {
            Some(EntityRecord::Data(data)) => Some(Ok(data.clone())),
            Some(EntityRecord::Error { code, message }) => Some(Err(EntityError::Entity {
                key: key.to_string(),
                code: *code,
                message: message.clone(),
            })),
            None => None,
        }
    }

    pub async fn job_details(
        &self,
        interrupt: &CancellationToken,
    ) -> Result<JobDetailsData, EntityError> {
        let entity_ref = EntityRef::JobDetails { job_id: self.job_id.clone() };
        let key = entity_ref.cache_key();
        match self.request(entity_ref, interrupt).await? {
            EntityData::JobDetails(details) => Ok(details),
            _ => Err(EntityError::WrongType { key }),
        }
    }

    pub async fn step_details(
        &self,
        step_id: &StepId,
        interrupt: &CancellationToken,
    ) -> Result<StepDetailsData, EntityError> {
        let entity_ref =
            EntityRef::StepDetails { job_id: self.job_id.clone(), step_id: step_id.clone() };
        let key = entity_ref.cache_key();
        match self.request(entity_ref, interrupt).await? {
            EntityData::StepDetails(details) => Ok(details),
            _ => Err(EntityError::WrongType { key }),
        }
    }

    pub async fn environment_details(
        &self,
        environment_id: &EnvironmentId,
        interrupt: &CancellationToken,
    ) -> Result<EnvironmentDetailsData, EntityError> {
        let entity_ref = EntityRef::EnvironmentDetails {
            job_id: self.job_id.clone(),
            environment_id: environment_id.clone(),
        };
        let key = entity_ref.cache_key();
        match self.request(entity_ref, interrupt).await? {
            EntityData::EnvironmentDetails(details) => Ok(details),
            _ => Err(EntityError::WrongType { key }),
        }
    }

    pub async fn job_attachment_details(
        &self,
        interrupt: &CancellationToken,
    ) -> Result<JobAttachmentDetailsData, EntityError> {
        let entity_ref = EntityRef::JobAttachmentDetails { job_id: self.job_id.clone() };
        let key = entity_ref.cache_key();
        match self.request(entity_ref, interrupt).await? {
            EntityData::JobAttachmentDetails(details) => Ok(details),
            _ => Err(EntityError::WrongType { key }),
        }
    }
}

#[cfg(test)]
#[path = "entities_tests.rs"]
mod tests;
