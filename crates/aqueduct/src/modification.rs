/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Claim modification coordinator.
//!
//! Updates and cancellations are not in-place mutations of the original
//! record. Each produces a new tracking record that references the original
//! through `related_request_id` and runs through the same coordinator and
//! outbox machinery as a fresh submission, so modifications inherit every
//! delivery guarantee the submission path has.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::blob::{artifact_pointer, BlobStore};
use crate::config::GatewayConfig;
use crate::coordinator::{AttemptOutcome, SyncCoordinator};
use crate::error::GatewayError;
use crate::models::NewRequestRecord;
use crate::state::{PipelineStage, RequestStatus};
use crate::store::RequestStore;

/// Outcome of an update or cancel request.
#[derive(Debug, Clone)]
pub enum ModifyOutcome {
    /// A new tracking record was created and processed.
    Accepted {
        request_id: Uuid,
        outcome: AttemptOutcome,
    },
    /// The referenced original does not exist.
    NotFound,
    /// The modification is not legal for the original's current state.
    Conflict,
}

pub struct ModificationCoordinator {
    store: Arc<dyn RequestStore>,
    blob: Arc<dyn BlobStore>,
    coordinator: SyncCoordinator,
    config: GatewayConfig,
}

impl ModificationCoordinator {
    pub fn new(
        store: Arc<dyn RequestStore>,
        blob: Arc<dyn BlobStore>,
        coordinator: SyncCoordinator,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            blob,
            coordinator,
            config,
        }
    }

    /// Submits an updated payload for an existing request.
    pub async fn update(
        &self,
        related_request_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<ModifyOutcome, GatewayError> {
        let original = match self.store.get(related_request_id).await? {
            Some(record) => record,
            None => return Ok(ModifyOutcome::NotFound),
        };

        self.submit_variant(&original, payload).await
    }

    /// Submits a cancellation for an existing request. Cancelling an
    /// already-cancelled record is a conflict.
    pub async fn cancel(&self, related_request_id: Uuid) -> Result<ModifyOutcome, GatewayError> {
        let original = match self.store.get(related_request_id).await? {
            Some(record) => record,
            None => return Ok(ModifyOutcome::NotFound),
        };
        if original.status == RequestStatus::Cancelled {
            return Ok(ModifyOutcome::Conflict);
        }

        let payload = serde_json::json!({
            "action": "cancel",
            "correlation_id": original.correlation_id,
            "target_request_id": original.id,
        });
        self.submit_variant(&original, payload).await
    }

    async fn submit_variant(
        &self,
        original: &crate::models::RequestRecord,
        payload: serde_json::Value,
    ) -> Result<ModifyOutcome, GatewayError> {
        let request_id = Uuid::new_v4();
        let pointer = artifact_pointer(
            self.config.payload_bucket(),
            &original.tenant,
            request_id,
            PipelineStage::Intake,
            "payload",
        );
        self.blob
            .put(&pointer, serde_json::to_vec(&payload).map_err(crate::error::BlobError::from)?)
            .await?;

        let record = self
            .store
            .create(NewRequestRecord {
                id: request_id,
                tenant: original.tenant.clone(),
                correlation_id: original.correlation_id.clone(),
                idempotency_key: None,
                payload: pointer,
                patient_ref: original.patient_ref.clone(),
                provider_ref: original.provider_ref.clone(),
                service_date: original.service_date,
                related_request_id: Some(original.id),
            })
            .await?;
        info!(
            request_id = %request_id,
            original = %original.id,
            "Created modification tracking record"
        );

        let outcome = self.coordinator.process(&record, payload, None).await?;
        Ok(ModifyOutcome::Accepted {
            request_id,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::models::BlobPointer;
    use crate::steps::{NoopRuleStep, NoopTransformStep};
    use crate::store::memory::MemoryBackend;
    use crate::store::{OutboxStore, StatusUpdate};

    struct Setup {
        store: Arc<MemoryBackend>,
        modification: ModificationCoordinator,
        original_id: Uuid,
    }

    async fn setup() -> Setup {
        let store = Arc::new(MemoryBackend::new());
        let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let config = GatewayConfig::default();
        let coordinator = SyncCoordinator::new(
            store.clone(),
            blob.clone(),
            Arc::new(NoopTransformStep),
            Arc::new(NoopRuleStep),
            config.clone(),
        );
        let modification =
            ModificationCoordinator::new(store.clone(), blob, coordinator, config);

        let original_id = Uuid::new_v4();
        store
            .create(NewRequestRecord {
                id: original_id,
                tenant: "tenant-a".to_string(),
                correlation_id: "bundle-1".to_string(),
                idempotency_key: None,
                payload: BlobPointer::new(
                    "artifacts",
                    format!("tenant-a/{}/intake/payload.json", original_id),
                ),
                patient_ref: Some("patient-1".to_string()),
                provider_ref: None,
                service_date: None,
                related_request_id: None,
            })
            .await
            .unwrap();

        Setup {
            store,
            modification,
            original_id,
        }
    }

    #[tokio::test]
    async fn test_update_creates_linked_record() {
        let s = setup().await;
        let outcome = s
            .modification
            .update(
                s.original_id,
                serde_json::json!({ "correlation_id": "bundle-1", "revision": 2 }),
            )
            .await
            .unwrap();

        let ModifyOutcome::Accepted { request_id, .. } = outcome else {
            panic!("expected accepted modification");
        };
        let record = s.store.get(request_id).await.unwrap().unwrap();
        assert_eq!(record.related_request_id, Some(s.original_id));
        assert_eq!(record.tenant, "tenant-a");
        assert_eq!(record.patient_ref.as_deref(), Some("patient-1"));
    }

    #[tokio::test]
    async fn test_update_unknown_original_is_not_found() {
        let s = setup().await;
        let outcome = s
            .modification
            .update(Uuid::new_v4(), serde_json::json!({}))
            .await
            .unwrap();
        assert!(matches!(outcome, ModifyOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_cancel_queues_through_pipeline() {
        let s = setup().await;
        let outcome = s.modification.cancel(s.original_id).await.unwrap();

        let ModifyOutcome::Accepted { request_id, outcome } = outcome else {
            panic!("expected accepted cancellation");
        };
        assert!(matches!(outcome, AttemptOutcome::Pended));
        let record = s.store.get(request_id).await.unwrap().unwrap();
        assert!(record.queued_async);
        assert_eq!(s.store.count_unpublished().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_of_cancelled_record_conflicts() {
        let s = setup().await;
        s.store
            .update_status(s.original_id, StatusUpdate::to(RequestStatus::Cancelled))
            .await
            .unwrap();

        let outcome = s.modification.cancel(s.original_id).await.unwrap();
        assert!(matches!(outcome, ModifyOutcome::Conflict));
    }

    #[tokio::test]
    async fn test_cancel_unknown_original_is_not_found() {
        let s = setup().await;
        let outcome = s.modification.cancel(Uuid::new_v4()).await.unwrap();
        assert!(matches!(outcome, ModifyOutcome::NotFound));
    }
}
