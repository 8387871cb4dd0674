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

//! Storage capability interfaces and their backends.
//!
//! All coordination between concurrent request handlers happens through
//! conditional writes against these stores; no in-memory locks span
//! requests. Two backends are provided:
//!
//! - `postgres`: diesel/deadpool-backed, transactional; the production
//!   backend. The persisted subscription store is required for
//!   multi-instance deployments.
//! - `memory`: process-local; for tests and single-process deployments.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    BlobPointer, IdempotencyEntry, NewOutboxEntry, NewRequestRecord, NewSubscription, OutboxEntry,
    RequestRecord, Subscription,
};
use crate::state::{PipelineStage, RequestStatus};

/// Arguments for one lifecycle transition.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: RequestStatus,
    pub last_stage: Option<PipelineStage>,
    pub next_stage: Option<PipelineStage>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    /// A transition with no error context.
    pub fn to(status: RequestStatus) -> Self {
        Self {
            status,
            last_stage: None,
            next_stage: None,
            error_code: None,
            error_message: None,
        }
    }

    pub fn with_stages(
        mut self,
        last_stage: Option<PipelineStage>,
        next_stage: Option<PipelineStage>,
    ) -> Self {
        self.last_stage = last_stage;
        self.next_stage = next_stage;
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }
}

/// Durable request lifecycle tracker.
///
/// Each transition is a single atomic update of status, stage, and
/// timestamp. `update_status` is idempotent when repeated with the same
/// arguments, and fails when the record does not exist, so events that
/// reference a request can only be produced after the record does.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Creates a record. Fails with `DuplicateRequest` if the id exists.
    async fn create(&self, new: NewRequestRecord) -> Result<RequestRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<RequestRecord>, StoreError>;

    async fn find_by_external_ref(
        &self,
        tenant: &str,
        external_ref: &str,
    ) -> Result<Option<RequestRecord>, StoreError>;

    async fn find_by_correlation_id(
        &self,
        tenant: &str,
        correlation_id: &str,
    ) -> Result<Option<RequestRecord>, StoreError>;

    async fn find_by_idempotency_key(
        &self,
        tenant: &str,
        key: &str,
    ) -> Result<Option<RequestRecord>, StoreError>;

    async fn find_by_patient_provider_date_range(
        &self,
        tenant: &str,
        patient_ref: &str,
        provider_ref: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, StoreError>;

    /// Applies one lifecycle transition atomically. Rejects illegal
    /// transitions; re-applying the identical transition is a no-op.
    async fn update_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<RequestRecord, StoreError>;

    /// Records the downstream tracking reference once assigned.
    async fn set_external_ref(&self, id: Uuid, external_ref: &str) -> Result<(), StoreError>;

    /// Records the final result blob pointer.
    async fn set_result(&self, id: Uuid, result: BlobPointer) -> Result<(), StoreError>;

    /// Atomic conditional update: sets `resolved_sync` if and only if
    /// neither completion flag is set yet. Returns whether it took effect.
    async fn try_mark_resolved_sync(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Atomic conditional update: sets `queued_async` if and only if
    /// neither completion flag is set yet. Returns whether it took effect.
    async fn try_mark_queued_async(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Applies one lifecycle transition and inserts the outbox entry it
    /// requires in the same transaction. This is the only way an outbox
    /// entry comes into existence.
    async fn update_status_with_outbox(
        &self,
        id: Uuid,
        update: StatusUpdate,
        outbox: NewOutboxEntry,
    ) -> Result<OutboxEntry, StoreError>;
}

/// Publisher-side view of the transactional outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Selects up to `limit` unpublished entries ordered by creation time,
    /// using a skip-locked read so concurrent publisher instances do not
    /// contend over the same rows.
    async fn claim_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Marks one entry published, in its own transaction.
    async fn mark_published(&self, id: i64) -> Result<(), StoreError>;

    /// Records a failed publish attempt: increments the retry count and
    /// stores the error, leaving the entry unpublished for the next cycle.
    async fn record_failure(&self, id: i64, error: &str) -> Result<(), StoreError>;

    /// Number of unpublished entries (operator visibility).
    async fn count_unpublished(&self) -> Result<i64, StoreError>;
}

/// Durable webhook subscription registry, indexed by target request id or
/// topic.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Registers a subscription. Fails with `InvalidSubscriptionTarget`
    /// unless exactly one of `request_id` and `topic` is set.
    async fn register(&self, new: NewSubscription) -> Result<Subscription, StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<Subscription>, StoreError>;

    /// Deletes a subscription; returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Active, unexpired subscriptions watching `request_id`.
    async fn list_active_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Active, unexpired subscriptions watching `topic`.
    async fn list_active_for_topic(&self, topic: &str) -> Result<Vec<Subscription>, StoreError>;

    /// Increments the failure counter; returns the new count.
    async fn record_delivery_failure(&self, id: Uuid) -> Result<i32, StoreError>;

    /// Durably disables the subscription (status = error).
    async fn disable(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Idempotency gate over an atomic check-and-set store with expiry.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically tests for a live entry under (tenant, key) and, if
    /// absent, reserves the pair for `request_id` with the given TTL.
    ///
    /// Returns the existing live entry on a duplicate, or `None` when the
    /// reservation succeeded. An expired entry counts as absent.
    async fn check_and_set(
        &self,
        tenant: &str,
        key: &str,
        request_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<IdempotencyEntry>, StoreError>;

    /// Records the response fingerprint and logical outcome for a reserved
    /// key once the original submission's outcome is known.
    async fn commit(
        &self,
        tenant: &str,
        key: &str,
        fingerprint: &str,
        outcome: &str,
    ) -> Result<(), StoreError>;

    /// Rolls back a reservation after a failure that produced no durable
    /// side effect, so the caller may retry with the same key.
    async fn remove(&self, tenant: &str, key: &str) -> Result<(), StoreError>;
}
