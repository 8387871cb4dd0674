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

//! Synchronous processing coordinator.
//!
//! Attempts full resolution of a request inside the configured deadline and
//! falls back to asynchronous hand-off otherwise. The attempt runs as a
//! spawned task gated by a bounded semaphore, so pool exhaustion degrades to
//! queuing rather than unbounded task growth.
//!
//! The deadline race is settled through the two completion flags on the
//! request record. Both are independent conditional updates that succeed
//! only while neither flag is set, so of a near-simultaneous conclusive
//! attempt and an elapsed deadline exactly one path wins. Hand-off proceeds
//! only if the async flag claim took effect; if it did not, the synchronous
//! path already won and publishing is skipped.
//!
//! Cancellation of a timed-out attempt is cooperative. The task checks a
//! flag between steps and may still finish in the background; its completion
//! flag claim is the only side effect the hand-off path has to tolerate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::{artifact_pointer, BlobStore};
use crate::config::GatewayConfig;
use crate::error::{CoordinatorError, StoreError};
use crate::models::{NewOutboxEntry, RequestRecord};
use crate::state::{PipelineStage, RequestStatus};
use crate::steps::{Decision, FieldError, RuleStep, StepOutcome, TransformStep};
use crate::store::{RequestStore, StatusUpdate};

/// Outcome of one coordinated processing attempt, as presented to the
/// caller-facing layer.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// A conclusive decision was reached and recorded synchronously.
    Resolved(Decision),
    /// The request was handed off to the asynchronous pipeline.
    Pended,
    /// The payload is invalid; terminal, never retried.
    ValidationFailed(Vec<FieldError>),
    /// An unexpected internal failure; terminal, no hand-off.
    Errored { code: String, message: String },
}

/// What the spawned attempt task reports back.
enum AttemptResult {
    /// Conclusive decision; `won_flag` is whether this attempt claimed the
    /// resolved-synchronously flag.
    Conclusive { decision: Decision, won_flag: bool },
    Inconclusive,
    ValidationFailed(Vec<FieldError>),
}

#[derive(Clone)]
pub struct SyncCoordinator {
    store: Arc<dyn RequestStore>,
    blob: Arc<dyn BlobStore>,
    transform: Arc<dyn TransformStep>,
    rules: Arc<dyn RuleStep>,
    semaphore: Arc<tokio::sync::Semaphore>,
    config: GatewayConfig,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn RequestStore>,
        blob: Arc<dyn BlobStore>,
        transform: Arc<dyn TransformStep>,
        rules: Arc<dyn RuleStep>,
        config: GatewayConfig,
    ) -> Self {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_attempts()));
        Self {
            store,
            blob,
            transform,
            rules,
            semaphore,
            config,
        }
    }

    /// Queues `record` for asynchronous processing without a synchronous
    /// attempt, under the same completion-flag discipline.
    pub async fn queue(
        &self,
        record: &RequestRecord,
    ) -> Result<AttemptOutcome, CoordinatorError> {
        self.hand_off_or_recover(record).await
    }

    /// Runs the deadline-bounded resolution attempt for `record`.
    pub async fn process(
        &self,
        record: &RequestRecord,
        payload: serde_json::Value,
        caller_identity: Option<&str>,
    ) -> Result<AttemptOutcome, CoordinatorError> {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                info!(
                    request_id = %record.id,
                    "Attempt pool exhausted, queuing without synchronous attempt"
                );
                metrics::counter!("aqueduct_sync_pool_exhausted_total").increment(1);
                return self.hand_off_or_recover(record).await;
            }
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let task = AttemptTask {
            store: self.store.clone(),
            blob: self.blob.clone(),
            transform: self.transform.clone(),
            rules: self.rules.clone(),
            cancelled: cancelled.clone(),
            request_id: record.id,
            tenant: record.tenant.clone(),
            correlation_id: record.correlation_id.clone(),
            caller_identity: caller_identity.map(String::from),
            result_bucket: self.config.payload_bucket().to_string(),
        };

        let handle = tokio::spawn(async move {
            let _permit = permit;
            task.run(payload).await
        });

        match tokio::time::timeout(self.config.sync_deadline(), handle).await {
            Ok(Ok(Ok(AttemptResult::Conclusive { decision, won_flag }))) => {
                if won_flag {
                    metrics::counter!("aqueduct_sync_resolved_total").increment(1);
                    Ok(AttemptOutcome::Resolved(decision))
                } else {
                    // Another path claimed completion first.
                    Ok(AttemptOutcome::Pended)
                }
            }
            Ok(Ok(Ok(AttemptResult::Inconclusive))) => {
                debug!(request_id = %record.id, "Attempt inconclusive, handing off");
                self.hand_off_or_recover(record).await
            }
            Ok(Ok(Ok(AttemptResult::ValidationFailed(errors)))) => {
                Ok(AttemptOutcome::ValidationFailed(errors))
            }
            Ok(Ok(Err(e))) => {
                warn!(request_id = %record.id, error = %e, "Attempt failed internally");
                self.record_internal_error(record.id, &e.to_string()).await;
                Ok(AttemptOutcome::Errored {
                    code: "internal".to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Err(join_error)) => {
                warn!(request_id = %record.id, error = %join_error, "Attempt task panicked");
                self.record_internal_error(record.id, "processing attempt aborted")
                    .await;
                Ok(AttemptOutcome::Errored {
                    code: "internal".to_string(),
                    message: "processing attempt aborted".to_string(),
                })
            }
            Err(_elapsed) => {
                // Deadline hit; let the attempt finish in the background.
                cancelled.store(true, Ordering::Relaxed);
                metrics::counter!("aqueduct_sync_deadline_exceeded_total").increment(1);
                debug!(request_id = %record.id, "Deadline exceeded, handing off");
                self.hand_off_or_recover(record).await
            }
        }
    }

    /// Claims the queued-async flag and, if won, writes the stage hand-off
    /// and its outbox entry in one transaction. A lost claim means the
    /// synchronous attempt completed concurrently; its stored result is
    /// returned instead.
    async fn hand_off_or_recover(
        &self,
        record: &RequestRecord,
    ) -> Result<AttemptOutcome, CoordinatorError> {
        if self.store.try_mark_queued_async(record.id).await? {
            // A pended record visibly leaves intake: the pipeline picks it
            // up at the parse stage the outbox message names.
            let update = StatusUpdate::to(RequestStatus::Parsing)
                .with_stages(Some(PipelineStage::Intake), Some(PipelineStage::Parse));
            let entry = NewOutboxEntry::for_stage(
                self.config.pipeline_queue(),
                record.id,
                &record.tenant,
                PipelineStage::Parse,
                &record.payload,
            );
            self.store
                .update_status_with_outbox(record.id, update, entry)
                .await?;
            metrics::counter!("aqueduct_async_handoff_total").increment(1);
            info!(request_id = %record.id, "Request queued for asynchronous processing");
            return Ok(AttemptOutcome::Pended);
        }

        // Sync path won the race after our deadline elapsed. Skip
        // publishing and surface whatever it recorded.
        debug!(request_id = %record.id, "Hand-off lost the completion race");
        self.recover_concurrent_outcome(record.id).await
    }

    /// Reads back what the concurrently completed synchronous attempt
    /// recorded. A conclusive attempt stores its result blob before
    /// claiming the flag, so a claimed flag with no result pointer can
    /// only be a validation failure.
    async fn recover_concurrent_outcome(
        &self,
        id: Uuid,
    ) -> Result<AttemptOutcome, CoordinatorError> {
        let record = self.store.get(id).await?.ok_or_else(|| {
            CoordinatorError::Store(StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            })
        })?;
        if !record.resolved_sync {
            // The async flag was claimed by another hand-off for this
            // record; the pipeline message already exists.
            return Ok(AttemptOutcome::Pended);
        }

        let pointer = match record.result {
            Some(pointer) => pointer,
            None => {
                return Ok(AttemptOutcome::ValidationFailed(vec![FieldError {
                    field: "payload".to_string(),
                    message: record
                        .error_message
                        .unwrap_or_else(|| "validation failed".to_string()),
                }]));
            }
        };
        let bytes = self.blob.get(&pointer).await?;
        let result: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| CoordinatorError::Store(StoreError::Corrupt(e.to_string())))?;
        let decision = result.get("decision").cloned().ok_or_else(|| {
            CoordinatorError::Store(StoreError::Corrupt(
                format!("result blob for {} has no decision", id),
            ))
        })?;
        let decision: Decision = serde_json::from_value(decision)
            .map_err(|e| CoordinatorError::Store(StoreError::Corrupt(e.to_string())))?;
        Ok(AttemptOutcome::Resolved(decision))
    }

    async fn record_internal_error(&self, id: Uuid, message: &str) {
        let update = StatusUpdate::to(RequestStatus::Error).with_error("internal", message);
        if let Err(e) = self.store.update_status(id, update).await {
            warn!(request_id = %id, error = %e, "Failed to record internal error state");
        }
    }
}

/// State captured for one spawned attempt.
struct AttemptTask {
    store: Arc<dyn RequestStore>,
    blob: Arc<dyn BlobStore>,
    transform: Arc<dyn TransformStep>,
    rules: Arc<dyn RuleStep>,
    cancelled: Arc<AtomicBool>,
    request_id: Uuid,
    tenant: String,
    correlation_id: String,
    caller_identity: Option<String>,
    result_bucket: String,
}

impl AttemptTask {
    async fn run(self, payload: serde_json::Value) -> Result<AttemptResult, CoordinatorError> {
        // Identity check: the correlation id inside the payload must match
        // the one supplied at submission.
        match payload.get("correlation_id").and_then(|v| v.as_str()) {
            Some(extracted) if extracted == self.correlation_id => {}
            Some(_) => {
                return Ok(self
                    .fail_validation(vec![FieldError {
                        field: "correlation_id".to_string(),
                        message: "does not match submission correlation id".to_string(),
                    }])
                    .await);
            }
            None => {
                return Ok(self
                    .fail_validation(vec![FieldError {
                        field: "correlation_id".to_string(),
                        message: "missing from payload".to_string(),
                    }])
                    .await);
            }
        }

        // When the payload names its submitter, it must match the caller
        // identity supplied at submission.
        if let (Some(identity), Some(submitter)) = (
            self.caller_identity.as_deref(),
            payload.get("submitter").and_then(|v| v.as_str()),
        ) {
            if identity != submitter {
                return Ok(self
                    .fail_validation(vec![FieldError {
                        field: "submitter".to_string(),
                        message: "does not match caller identity".to_string(),
                    }])
                    .await);
            }
        }

        if self.cancelled.load(Ordering::Relaxed) {
            return Ok(AttemptResult::Inconclusive);
        }

        // Transport failures fall back to the asynchronous path; only an
        // explicit validation failure is a caller error.
        let transformed = match self.transform.transform(&self.tenant, &payload).await {
            Ok(v) => v,
            Err(e) => {
                debug!(request_id = %self.request_id, error = %e, "Transform step failed");
                return Ok(AttemptResult::Inconclusive);
            }
        };

        if self.cancelled.load(Ordering::Relaxed) {
            return Ok(AttemptResult::Inconclusive);
        }

        let outcome = match self.rules.evaluate(&self.tenant, &transformed).await {
            Ok(o) => o,
            Err(e) => {
                debug!(request_id = %self.request_id, error = %e, "Rule step failed");
                return Ok(AttemptResult::Inconclusive);
            }
        };

        match outcome {
            StepOutcome::Inconclusive => Ok(AttemptResult::Inconclusive),
            StepOutcome::ValidationFailed(errors) => Ok(self.fail_validation(errors).await),
            StepOutcome::Conclusive(decision) => self.conclude(decision).await,
        }
    }

    /// Persists a conclusive decision and races for the resolved flag. Runs
    /// to completion even when cancelled: a decision that was reached is
    /// worth keeping if the flag claim still succeeds.
    async fn conclude(&self, decision: Decision) -> Result<AttemptResult, CoordinatorError> {
        let pointer = artifact_pointer(
            &self.result_bucket,
            &self.tenant,
            self.request_id,
            PipelineStage::Respond,
            "result",
        );
        let result_body = serde_json::json!({
            "request_id": self.request_id,
            "decision": &decision,
        });
        self.blob
            .put(&pointer, serde_json::to_vec(&result_body).map_err(crate::error::BlobError::from)?)
            .await?;
        self.store.set_result(self.request_id, pointer).await?;

        let won_flag = self.store.try_mark_resolved_sync(self.request_id).await?;
        if won_flag {
            let update = StatusUpdate::to(RequestStatus::Completed)
                .with_stages(Some(PipelineStage::Respond), None);
            self.store.update_status(self.request_id, update).await?;
        }
        Ok(AttemptResult::Conclusive { decision, won_flag })
    }

    /// Records a validation failure. Races for the resolved flag first so
    /// an attempt that finishes after the deadline cannot mark a record
    /// terminal once the hand-off has already queued it.
    async fn fail_validation(&self, errors: Vec<FieldError>) -> AttemptResult {
        let won_flag = match self.store.try_mark_resolved_sync(self.request_id).await {
            Ok(won) => won,
            Err(e) => {
                warn!(
                    request_id = %self.request_id,
                    error = %e,
                    "Failed to claim completion flag for validation failure"
                );
                false
            }
        };
        if won_flag {
            let message = errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            let update = StatusUpdate::to(RequestStatus::ValidationFailed)
                .with_error("validation", &message);
            if let Err(e) = self.store.update_status(self.request_id, update).await {
                warn!(request_id = %self.request_id, error = %e, "Failed to record validation failure");
            }
        } else {
            debug!(
                request_id = %self.request_id,
                "Validation failure lost the completion race, leaving record to the pipeline"
            );
        }
        AttemptResult::ValidationFailed(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::models::{BlobPointer, NewRequestRecord};
    use crate::steps::{NoopRuleStep, NoopTransformStep, StepOutcome};
    use crate::store::memory::MemoryBackend;
    use crate::store::OutboxStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedRuleStep(StepOutcome);

    #[async_trait]
    impl RuleStep for FixedRuleStep {
        async fn evaluate(
            &self,
            _tenant: &str,
            _transformed: &serde_json::Value,
        ) -> Result<StepOutcome, crate::error::StepError> {
            Ok(self.0.clone())
        }
    }

    struct SlowRuleStep(Duration);

    #[async_trait]
    impl RuleStep for SlowRuleStep {
        async fn evaluate(
            &self,
            _tenant: &str,
            _transformed: &serde_json::Value,
        ) -> Result<StepOutcome, crate::error::StepError> {
            tokio::time::sleep(self.0).await;
            Ok(StepOutcome::Conclusive(Decision::Approved {
                reference: Some("AUTH-1".to_string()),
            }))
        }
    }

    struct FailingRuleStep;

    #[async_trait]
    impl RuleStep for FailingRuleStep {
        async fn evaluate(
            &self,
            _tenant: &str,
            _transformed: &serde_json::Value,
        ) -> Result<StepOutcome, crate::error::StepError> {
            Err(crate::error::StepError::Transport("connection refused".to_string()))
        }
    }

    struct Harness {
        store: Arc<MemoryBackend>,
        record: RequestRecord,
        payload: serde_json::Value,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryBackend::new());
        let id = Uuid::new_v4();
        let record = store
            .create(NewRequestRecord {
                id,
                tenant: "tenant-a".to_string(),
                correlation_id: "bundle-1".to_string(),
                idempotency_key: None,
                payload: BlobPointer::new("artifacts", format!("tenant-a/{}/intake/payload.json", id)),
                patient_ref: None,
                provider_ref: None,
                service_date: None,
                related_request_id: None,
            })
            .await
            .unwrap();
        let payload = serde_json::json!({ "correlation_id": "bundle-1", "items": [] });
        Harness {
            store,
            record,
            payload,
        }
    }

    fn coordinator(store: Arc<MemoryBackend>, rules: Arc<dyn RuleStep>, deadline: Duration) -> SyncCoordinator {
        let config = GatewayConfig::builder()
            .sync_deadline(deadline)
            .step_timeout(deadline / 2)
            .build()
            .unwrap();
        SyncCoordinator::new(
            store,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(NoopTransformStep),
            rules,
            config,
        )
    }

    #[tokio::test]
    async fn test_conclusive_attempt_resolves_inline() {
        let h = harness().await;
        let c = coordinator(
            h.store.clone(),
            Arc::new(FixedRuleStep(StepOutcome::Conclusive(Decision::Approved {
                reference: Some("AUTH-9".to_string()),
            }))),
            Duration::from_secs(5),
        );

        let outcome = c.process(&h.record, h.payload, None).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Resolved(Decision::Approved { .. })));

        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert!(record.resolved_sync);
        assert!(!record.queued_async);
        assert_eq!(record.status, RequestStatus::Completed);
        assert!(record.result.is_some());
        assert_eq!(h.store.count_unpublished().await.unwrap(), 0, "no outbox on sync win");
    }

    #[tokio::test]
    async fn test_inconclusive_attempt_hands_off_with_outbox() {
        let h = harness().await;
        let c = coordinator(h.store.clone(), Arc::new(NoopRuleStep), Duration::from_secs(5));

        let outcome = c.process(&h.record, h.payload, None).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Pended));

        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert!(record.queued_async);
        assert!(!record.resolved_sync);
        assert_eq!(h.store.count_unpublished().await.unwrap(), 1);

        // A pended record moves past intake with the hand-off itself.
        assert_eq!(record.status, RequestStatus::Parsing);
        assert_eq!(record.last_stage, Some(PipelineStage::Intake));
        assert_eq!(record.next_stage, Some(PipelineStage::Parse));
    }

    #[tokio::test]
    async fn test_step_transport_failure_falls_back_to_async() {
        let h = harness().await;
        let c = coordinator(h.store.clone(), Arc::new(FailingRuleStep), Duration::from_secs(5));

        let outcome = c.process(&h.record, h.payload, None).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Pended));
        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert!(record.queued_async);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_hands_off() {
        let h = harness().await;
        let c = coordinator(
            h.store.clone(),
            Arc::new(SlowRuleStep(Duration::from_secs(10))),
            Duration::from_millis(50),
        );

        let outcome = c.process(&h.record, h.payload, None).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Pended));

        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert!(record.queued_async);
        assert_eq!(h.store.count_unpublished().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_late_conclusive_attempt_loses_flag_race() {
        let h = harness().await;
        let c = coordinator(
            h.store.clone(),
            Arc::new(SlowRuleStep(Duration::from_millis(200))),
            Duration::from_millis(50),
        );

        let outcome = c.process(&h.record, h.payload, None).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Pended));

        // Let the background attempt finish and try its flag claim.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert!(record.queued_async, "async path won the race");
        assert!(!record.resolved_sync, "late attempt must not also claim");
        assert_eq!(
            h.store.count_unpublished().await.unwrap(),
            1,
            "exactly one hand-off message"
        );
    }

    #[tokio::test]
    async fn test_correlation_mismatch_is_validation_failure() {
        let h = harness().await;
        let c = coordinator(h.store.clone(), Arc::new(NoopRuleStep), Duration::from_secs(5));
        let payload = serde_json::json!({ "correlation_id": "someone-else" });

        let outcome = c.process(&h.record, payload, None).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::ValidationFailed(_)));

        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert_eq!(record.status, RequestStatus::ValidationFailed);
        assert!(record.resolved_sync, "validation failure claims the sync flag");
        assert_eq!(h.store.count_unpublished().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_submitter_mismatch_fails_validation() {
        let h = harness().await;
        let c = coordinator(h.store.clone(), Arc::new(NoopRuleStep), Duration::from_secs(5));
        let payload = serde_json::json!({
            "correlation_id": "bundle-1",
            "submitter": "someone-else",
        });

        let outcome = c
            .process(&h.record, payload, Some("clinic-1"))
            .await
            .unwrap();
        let AttemptOutcome::ValidationFailed(errors) = outcome else {
            panic!("expected validation failure");
        };
        assert_eq!(errors[0].field, "submitter");
        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert_eq!(record.status, RequestStatus::ValidationFailed);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_degrades_to_queuing() {
        let h = harness().await;
        let config = GatewayConfig::builder()
            .sync_deadline(Duration::from_secs(5))
            .step_timeout(Duration::from_secs(1))
            .max_concurrent_attempts(1)
            .build()
            .unwrap();
        let c = SyncCoordinator::new(
            h.store.clone(),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(NoopTransformStep),
            Arc::new(SlowRuleStep(Duration::from_secs(10))),
            config,
        );

        // Occupy the only slot.
        let blocker = h.record.clone();
        let c2 = c.clone();
        let payload = h.payload.clone();
        let _busy = tokio::spawn(async move { c2.process(&blocker, payload, None).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A second request finds the pool exhausted and queues directly.
        let store = h.store.clone();
        let id = Uuid::new_v4();
        let second = store
            .create(NewRequestRecord {
                id,
                tenant: "tenant-a".to_string(),
                correlation_id: "bundle-2".to_string(),
                idempotency_key: None,
                payload: BlobPointer::new("artifacts", format!("tenant-a/{}/intake/payload.json", id)),
                patient_ref: None,
                provider_ref: None,
                service_date: None,
                related_request_id: None,
            })
            .await
            .unwrap();

        let outcome = c
            .process(&second, serde_json::json!({ "correlation_id": "bundle-2" }), None)
            .await
            .unwrap();
        assert!(matches!(outcome, AttemptOutcome::Pended));
        assert!(h.store.get(id).await.unwrap().unwrap().queued_async);
    }

    #[tokio::test]
    async fn test_queue_skips_synchronous_attempt() {
        let h = harness().await;
        let c = coordinator(
            h.store.clone(),
            Arc::new(FixedRuleStep(StepOutcome::Conclusive(Decision::Approved {
                reference: None,
            }))),
            Duration::from_secs(5),
        );

        // Even an always-approving rules engine is never consulted.
        let outcome = c.queue(&h.record).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Pended));

        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert!(record.queued_async);
        assert!(!record.resolved_sync);
        assert_eq!(record.status, RequestStatus::Parsing);
        assert_eq!(h.store.count_unpublished().await.unwrap(), 1);
    }

    struct SlowValidationStep(Duration);

    #[async_trait]
    impl RuleStep for SlowValidationStep {
        async fn evaluate(
            &self,
            _tenant: &str,
            _transformed: &serde_json::Value,
        ) -> Result<StepOutcome, crate::error::StepError> {
            tokio::time::sleep(self.0).await;
            Ok(StepOutcome::ValidationFailed(vec![FieldError {
                field: "items".to_string(),
                message: "must not be empty".to_string(),
            }]))
        }
    }

    #[tokio::test]
    async fn test_late_validation_failure_does_not_override_hand_off() {
        let h = harness().await;
        let c = coordinator(
            h.store.clone(),
            Arc::new(SlowValidationStep(Duration::from_millis(200))),
            Duration::from_millis(50),
        );

        let outcome = c.process(&h.record, h.payload, None).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Pended));

        // Let the background attempt report its validation failure.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let record = h.store.get(h.record.id).await.unwrap().unwrap();
        assert!(record.queued_async, "hand-off won the race");
        assert!(!record.resolved_sync, "late validation must not also claim");
        assert_eq!(
            record.status,
            RequestStatus::Parsing,
            "a queued request stays with the pipeline"
        );
        assert_eq!(h.store.count_unpublished().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recovery_surfaces_concurrent_validation_failure() {
        let h = harness().await;
        let c = coordinator(h.store.clone(), Arc::new(NoopRuleStep), Duration::from_secs(5));

        // A concurrent attempt already claimed the flag and recorded a
        // validation failure.
        assert!(h.store.try_mark_resolved_sync(h.record.id).await.unwrap());
        h.store
            .update_status(
                h.record.id,
                StatusUpdate::to(RequestStatus::ValidationFailed)
                    .with_error("validation", "items: must not be empty"),
            )
            .await
            .unwrap();

        let outcome = c.queue(&h.record).await.unwrap();
        let AttemptOutcome::ValidationFailed(errors) = outcome else {
            panic!("expected the recorded validation failure");
        };
        assert!(errors[0].message.contains("must not be empty"));
        assert_eq!(h.store.count_unpublished().await.unwrap(), 0, "nothing queued");
    }

    #[tokio::test]
    async fn test_recovery_with_unreadable_result_is_an_error() {
        let h = harness().await;
        let c = coordinator(h.store.clone(), Arc::new(NoopRuleStep), Duration::from_secs(5));

        h.store
            .set_result(h.record.id, BlobPointer::new("artifacts", "gone.json"))
            .await
            .unwrap();
        assert!(h.store.try_mark_resolved_sync(h.record.id).await.unwrap());

        // The flag says resolved but the result blob cannot be read; that
        // must surface as an error, not a pend.
        let result = c.queue(&h.record).await;
        assert!(result.is_err());
        assert_eq!(h.store.count_unpublished().await.unwrap(), 0);
    }
}
