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

//! Caller-facing gateway facade.
//!
//! This is the single entry point that callers (transport adapters, service
//! binaries) interact with. It stitches together the idempotency gate, the
//! request store, the synchronous coordinator, the modification coordinator,
//! and the subscription notifier, and translates their results into the
//! logical outcomes a caller sees: resolved, pended, duplicate,
//! validation-error, not-found, conflict.
//!
//! The facade owns ordering: payload validation happens before the
//! idempotency gate reserves anything, and a reservation is rolled back if
//! record creation fails before any durable side effect exists. Once the
//! tracking record is created, the reservation sticks and its outcome is
//! committed so later duplicates collapse onto the same request id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::{artifact_pointer, BlobStore};
use crate::config::GatewayConfig;
use crate::coordinator::{AttemptOutcome, SyncCoordinator};
use crate::error::{BlobError, GatewayError};
use crate::models::{NewRequestRecord, NewSubscription, RequestRecord, Subscription};
use crate::modification::{ModificationCoordinator, ModifyOutcome};
use crate::notifier::SubscriptionNotifier;
use crate::state::PipelineStage;
use crate::steps::{Decision, FieldError};
use crate::store::{IdempotencyStore, RequestStore, StatusUpdate, SubscriptionStore};

/// One submission as received from a caller, before any processing.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub tenant: String,
    /// Caller-supplied bundle identifier, echoed back in inquiries.
    pub correlation_id: String,
    /// Identity of the submitting party. Checked against the payload's
    /// `submitter` field when the payload carries one.
    pub caller_identity: String,
    pub idempotency_key: Option<String>,
    pub payload: serde_json::Value,
    /// When false, the synchronous attempt is skipped and the request is
    /// queued for the pipeline straight away.
    pub sync_mode: bool,
    /// Lookup fields extracted by the transport adapter, if present.
    pub patient_ref: Option<String>,
    pub provider_ref: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
}

/// Logical outcome of a submission, as returned to the caller.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A conclusive decision was reached within the synchronous deadline.
    Resolved {
        request_id: Uuid,
        decision: Decision,
    },
    /// The request was accepted and handed to the asynchronous pipeline.
    Pended { request_id: Uuid },
    /// The idempotency key was already used; the original's id and
    /// recorded outcome are returned instead of reprocessing.
    Duplicate {
        request_id: Uuid,
        original_outcome: Option<String>,
    },
    /// The payload failed validation; nothing was queued.
    ValidationError { errors: Vec<FieldError> },
    /// Processing hit an internal failure after the record became durable.
    Errored {
        request_id: Uuid,
        code: String,
        message: String,
    },
}

/// Lookup criteria accepted by `inquiry`.
#[derive(Debug, Clone)]
pub enum InquiryQuery {
    RequestId(Uuid),
    ExternalRef(String),
    BundleIdentifier(String),
    PatientProviderDateRange {
        patient_ref: String,
        provider_ref: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

/// Result of an inquiry. `NotFound` is a logical outcome, not an error.
#[derive(Debug, Clone)]
pub enum InquiryOutcome {
    Found(Vec<RequestRecord>),
    NotFound,
}

pub struct Gateway {
    requests: Arc<dyn RequestStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    gate: Arc<dyn IdempotencyStore>,
    blob: Arc<dyn BlobStore>,
    coordinator: SyncCoordinator,
    modification: ModificationCoordinator,
    notifier: SubscriptionNotifier,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        gate: Arc<dyn IdempotencyStore>,
        blob: Arc<dyn BlobStore>,
        coordinator: SyncCoordinator,
        notifier: SubscriptionNotifier,
        config: GatewayConfig,
    ) -> Self {
        let modification = ModificationCoordinator::new(
            requests.clone(),
            blob.clone(),
            coordinator.clone(),
            config.clone(),
        );
        Self {
            requests,
            subscriptions,
            gate,
            blob,
            coordinator,
            modification,
            notifier,
            config,
        }
    }

    /// Accepts one submission and drives it to a logical outcome.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, GatewayError> {
        let errors = validate_submit(&request);
        if !errors.is_empty() {
            debug!(tenant = %request.tenant, "Rejected submission at intake validation");
            metrics::counter!("aqueduct_submit_validation_rejects_total").increment(1);
            return Ok(SubmitOutcome::ValidationError { errors });
        }

        let request_id = Uuid::new_v4();

        // Reserve the idempotency key before any durable work, so a
        // concurrent duplicate collapses onto exactly one request id.
        let reserved_key = match &request.idempotency_key {
            Some(key) => {
                let existing = self
                    .gate
                    .check_and_set(
                        &request.tenant,
                        key,
                        request_id,
                        self.config.idempotency_ttl(),
                    )
                    .await?;
                if let Some(entry) = existing {
                    info!(
                        tenant = %request.tenant,
                        request_id = %entry.request_id,
                        "Duplicate idempotency key, returning original"
                    );
                    metrics::counter!("aqueduct_submit_duplicates_total").increment(1);
                    return Ok(SubmitOutcome::Duplicate {
                        request_id: entry.request_id,
                        original_outcome: entry.outcome,
                    });
                }
                Some(key.clone())
            }
            None => None,
        };

        let record = match self.create_record(request_id, &request).await {
            Ok(record) => record,
            Err(e) => {
                // No tracking record exists, so the reservation must not
                // survive; otherwise a retry with the same key would be
                // treated as a duplicate of nothing.
                if let Some(key) = &reserved_key {
                    if let Err(remove_err) = self.gate.remove(&request.tenant, key).await {
                        warn!(
                            tenant = %request.tenant,
                            error = %remove_err,
                            "Failed to roll back idempotency reservation"
                        );
                    }
                }
                return Err(e);
            }
        };

        let outcome = if request.sync_mode {
            self.coordinator
                .process(&record, request.payload, Some(&request.caller_identity))
                .await?
        } else {
            debug!(request_id = %record.id, "Synchronous attempt declined by caller");
            self.coordinator.queue(&record).await?
        };
        let submit_outcome = self.finish(record, outcome, reserved_key.as_deref()).await?;
        Ok(submit_outcome)
    }

    async fn create_record(
        &self,
        request_id: Uuid,
        request: &SubmitRequest,
    ) -> Result<RequestRecord, GatewayError> {
        let pointer = artifact_pointer(
            self.config.payload_bucket(),
            &request.tenant,
            request_id,
            PipelineStage::Intake,
            "payload",
        );
        self.blob
            .put(
                &pointer,
                serde_json::to_vec(&request.payload).map_err(BlobError::from)?,
            )
            .await?;

        let record = self
            .requests
            .create(NewRequestRecord {
                id: request_id,
                tenant: request.tenant.clone(),
                correlation_id: request.correlation_id.clone(),
                idempotency_key: request.idempotency_key.clone(),
                payload: pointer,
                patient_ref: request.patient_ref.clone(),
                provider_ref: request.provider_ref.clone(),
                service_date: request.service_date,
                related_request_id: None,
            })
            .await?;
        Ok(record)
    }

    /// Commits the idempotency outcome, fires terminal notifications, and
    /// maps the attempt outcome onto the caller-facing one.
    async fn finish(
        &self,
        record: RequestRecord,
        outcome: AttemptOutcome,
        reserved_key: Option<&str>,
    ) -> Result<SubmitOutcome, GatewayError> {
        let (code, fingerprint) = match &outcome {
            AttemptOutcome::Resolved(decision) => {
                ("resolved", fingerprint_of(decision))
            }
            AttemptOutcome::Pended => ("pended", record.id.to_string()),
            AttemptOutcome::ValidationFailed(_) => {
                ("validation-error", record.id.to_string())
            }
            AttemptOutcome::Errored { code, .. } => ("error", format!("{}:{}", record.id, code)),
        };
        if let Some(key) = reserved_key {
            if let Err(e) = self.gate.commit(&record.tenant, key, &fingerprint, code).await {
                warn!(
                    tenant = %record.tenant,
                    request_id = %record.id,
                    error = %e,
                    "Failed to commit idempotency outcome"
                );
            }
        }

        self.notify_if_terminal(record.id).await;

        Ok(match outcome {
            AttemptOutcome::Resolved(decision) => SubmitOutcome::Resolved {
                request_id: record.id,
                decision,
            },
            AttemptOutcome::Pended => SubmitOutcome::Pended {
                request_id: record.id,
            },
            AttemptOutcome::ValidationFailed(errors) => SubmitOutcome::ValidationError { errors },
            AttemptOutcome::Errored { code, message } => SubmitOutcome::Errored {
                request_id: record.id,
                code,
                message,
            },
        })
    }

    /// Finds requests by any of the supported lookup criteria, scoped to
    /// `tenant`.
    pub async fn inquiry(
        &self,
        tenant: &str,
        query: InquiryQuery,
    ) -> Result<InquiryOutcome, GatewayError> {
        let records = match query {
            InquiryQuery::RequestId(id) => match self.requests.get(id).await? {
                Some(record) if record.tenant == tenant => vec![record],
                _ => vec![],
            },
            InquiryQuery::ExternalRef(external_ref) => self
                .requests
                .find_by_external_ref(tenant, &external_ref)
                .await?
                .into_iter()
                .collect(),
            InquiryQuery::BundleIdentifier(correlation_id) => self
                .requests
                .find_by_correlation_id(tenant, &correlation_id)
                .await?
                .into_iter()
                .collect(),
            InquiryQuery::PatientProviderDateRange {
                patient_ref,
                provider_ref,
                from,
                to,
            } => {
                self.requests
                    .find_by_patient_provider_date_range(
                        tenant,
                        &patient_ref,
                        &provider_ref,
                        from,
                        to,
                    )
                    .await?
            }
        };

        if records.is_empty() {
            Ok(InquiryOutcome::NotFound)
        } else {
            Ok(InquiryOutcome::Found(records))
        }
    }

    /// Current lifecycle snapshot for one request.
    pub async fn status(&self, request_id: Uuid) -> Result<Option<RequestRecord>, GatewayError> {
        Ok(self.requests.get(request_id).await?)
    }

    /// Submits an updated payload referencing an existing request.
    pub async fn update(
        &self,
        related_request_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<ModifyOutcome, GatewayError> {
        self.modification.update(related_request_id, payload).await
    }

    /// Submits a cancellation referencing an existing request.
    pub async fn cancel(&self, related_request_id: Uuid) -> Result<ModifyOutcome, GatewayError> {
        self.modification.cancel(related_request_id).await
    }

    /// Records a pipeline stage transition reported by a worker and fires
    /// terminal-state notifications when the transition completes the
    /// request.
    pub async fn record_stage_transition(
        &self,
        request_id: Uuid,
        update: StatusUpdate,
    ) -> Result<RequestRecord, GatewayError> {
        let record = self.requests.update_status(request_id, update).await?;
        if record.status.is_terminal() {
            self.notifier.notify_terminal(&record).await;
        }
        Ok(record)
    }

    pub async fn create_subscription(
        &self,
        new: NewSubscription,
    ) -> Result<Subscription, GatewayError> {
        Ok(self.subscriptions.register(new).await?)
    }

    pub async fn get_subscription(
        &self,
        id: Uuid,
    ) -> Result<Option<Subscription>, GatewayError> {
        Ok(self.subscriptions.find(id).await?)
    }

    /// Deletes a subscription; returns whether it existed.
    pub async fn delete_subscription(&self, id: Uuid) -> Result<bool, GatewayError> {
        Ok(self.subscriptions.delete(id).await?)
    }

    async fn notify_if_terminal(&self, request_id: Uuid) {
        match self.requests.get(request_id).await {
            Ok(Some(record)) if record.status.is_terminal() => {
                self.notifier.notify_terminal(&record).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Post-outcome record read failed");
            }
        }
    }
}

/// Intake validation, applied before any durable work.
fn validate_submit(request: &SubmitRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if request.tenant.trim().is_empty() {
        errors.push(FieldError {
            field: "tenant".to_string(),
            message: "tenant must not be empty".to_string(),
        });
    }
    if request.correlation_id.trim().is_empty() {
        errors.push(FieldError {
            field: "correlation_id".to_string(),
            message: "correlation identifier must not be empty".to_string(),
        });
    }
    if request.caller_identity.trim().is_empty() {
        errors.push(FieldError {
            field: "caller_identity".to_string(),
            message: "caller identity must not be empty".to_string(),
        });
    }
    if !request.payload.is_object() {
        errors.push(FieldError {
            field: "payload".to_string(),
            message: "payload must be a JSON object".to_string(),
        });
    }
    errors
}

/// SHA-256 hex digest of the serialized decision, recorded against the
/// idempotency entry so a duplicate can be answered from the gate alone.
fn fingerprint_of(decision: &Decision) -> String {
    let body = serde_json::to_vec(decision).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&body);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let decision = Decision::Approved {
            reference: Some("AUTH-1".to_string()),
        };
        assert_eq!(fingerprint_of(&decision), fingerprint_of(&decision));
        assert_eq!(fingerprint_of(&decision).len(), 64);
    }

    #[test]
    fn test_validate_rejects_empty_identity() {
        let request = SubmitRequest {
            tenant: "  ".to_string(),
            correlation_id: String::new(),
            caller_identity: String::new(),
            idempotency_key: None,
            payload: serde_json::json!([]),
            sync_mode: true,
            patient_ref: None,
            provider_ref: None,
            service_date: None,
        };
        let errors = validate_submit(&request);
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["tenant", "correlation_id", "caller_identity", "payload"]
        );
    }

    #[test]
    fn test_validate_accepts_well_formed_submission() {
        let request = SubmitRequest {
            tenant: "tenant-a".to_string(),
            correlation_id: "bundle-1".to_string(),
            caller_identity: "clinic-1".to_string(),
            idempotency_key: Some("key-1".to_string()),
            payload: serde_json::json!({ "correlation_id": "bundle-1" }),
            sync_mode: true,
            patient_ref: None,
            provider_ref: None,
            service_date: None,
        };
        assert!(validate_submit(&request).is_empty());
    }
}
