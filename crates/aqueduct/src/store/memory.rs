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

//! In-memory storage backend.
//!
//! Request records, outbox entries, and subscriptions share one lock, so
//! `update_status_with_outbox` has the same all-or-nothing visibility as
//! the Postgres transaction it stands in for. Intended for tests and
//! single-process deployments; multi-instance deployments must use the
//! persisted backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    BlobPointer, IdempotencyEntry, NewOutboxEntry, NewRequestRecord, NewSubscription, OutboxEntry,
    RequestRecord, Subscription, SubscriptionStatus,
};

use super::{
    IdempotencyStore, OutboxStore, RequestStore, StatusUpdate, SubscriptionStore,
};

#[derive(Default)]
struct Inner {
    requests: HashMap<Uuid, RequestRecord>,
    outbox: Vec<OutboxEntry>,
    next_outbox_id: i64,
    subscriptions: HashMap<Uuid, Subscription>,
}

impl Inner {
    fn insert_outbox(&mut self, new: NewOutboxEntry, now: DateTime<Utc>) -> OutboxEntry {
        self.next_outbox_id += 1;
        let entry = OutboxEntry {
            id: self.next_outbox_id,
            destination: new.destination,
            message_key: new.message_key,
            body: new.body,
            published: false,
            published_at: None,
            retry_count: 0,
            last_error: None,
            created_at: now,
        };
        self.outbox.push(entry.clone());
        entry
    }

    fn apply_status_update(
        record: &mut RequestRecord,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let identical = record.status == update.status
            && record.last_stage == update.last_stage
            && record.next_stage == update.next_stage
            && record.error_code == update.error_code
            && record.error_message == update.error_message;
        if identical {
            return Ok(());
        }

        if !record.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                id: record.id,
                from: record.status,
                to: update.status,
            });
        }

        record.status = update.status;
        record.last_stage = update.last_stage;
        record.next_stage = update.next_stage;
        record.error_code = update.error_code.clone();
        record.error_message = update.error_message.clone();
        record.updated_at = now;
        if update.status.is_terminal() && record.completed_at.is_none() {
            record.completed_at = Some(now);
        }
        Ok(())
    }
}

/// Storage backend holding everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryBackend {
    async fn create(&self, new: NewRequestRecord) -> Result<RequestRecord, StoreError> {
        let mut inner = self.inner.lock();
        if inner.requests.contains_key(&new.id) {
            return Err(StoreError::DuplicateRequest(new.id));
        }
        let now = Utc::now();
        let record = RequestRecord {
            id: new.id,
            tenant: new.tenant,
            correlation_id: new.correlation_id,
            idempotency_key: new.idempotency_key,
            external_ref: None,
            status: crate::state::RequestStatus::Received,
            last_stage: Some(crate::state::PipelineStage::Intake),
            next_stage: Some(crate::state::PipelineStage::Parse),
            resolved_sync: false,
            queued_async: false,
            payload: new.payload,
            result: None,
            patient_ref: new.patient_ref,
            provider_ref: new.provider_ref,
            service_date: new.service_date,
            related_request_id: new.related_request_id,
            error_code: None,
            error_message: None,
            retry_count: 0,
            received_at: now,
            updated_at: now,
            completed_at: None,
        };
        inner.requests.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RequestRecord>, StoreError> {
        Ok(self.inner.lock().requests.get(&id).cloned())
    }

    async fn find_by_external_ref(
        &self,
        tenant: &str,
        external_ref: &str,
    ) -> Result<Option<RequestRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .requests
            .values()
            .find(|r| r.tenant == tenant && r.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn find_by_correlation_id(
        &self,
        tenant: &str,
        correlation_id: &str,
    ) -> Result<Option<RequestRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .requests
            .values()
            .find(|r| r.tenant == tenant && r.correlation_id == correlation_id)
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant: &str,
        key: &str,
    ) -> Result<Option<RequestRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .requests
            .values()
            .find(|r| r.tenant == tenant && r.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_by_patient_provider_date_range(
        &self,
        tenant: &str,
        patient_ref: &str,
        provider_ref: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .requests
            .values()
            .filter(|r| {
                r.tenant == tenant
                    && r.patient_ref.as_deref() == Some(patient_ref)
                    && r.provider_ref.as_deref() == Some(provider_ref)
                    && r.service_date.map(|d| d >= from && d <= to).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<RequestRecord, StoreError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let record = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            })?;
        Inner::apply_status_update(record, &update, now)?;
        Ok(record.clone())
    }

    async fn set_external_ref(&self, id: Uuid, external_ref: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let record = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            })?;
        record.external_ref = Some(external_ref.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_result(&self, id: Uuid, result: BlobPointer) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let record = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            })?;
        record.result = Some(result);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn try_mark_resolved_sync(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let record = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            })?;
        if record.resolved_sync || record.queued_async {
            return Ok(false);
        }
        record.resolved_sync = true;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn try_mark_queued_async(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let record = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            })?;
        if record.resolved_sync || record.queued_async {
            return Ok(false);
        }
        record.queued_async = true;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_status_with_outbox(
        &self,
        id: Uuid,
        update: StatusUpdate,
        outbox: NewOutboxEntry,
    ) -> Result<OutboxEntry, StoreError> {
        // Both writes happen under one lock acquisition, standing in for
        // the database transaction of the persisted backend.
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let record = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "request",
                id: id.to_string(),
            })?;
        Inner::apply_status_update(record, &update, now)?;
        Ok(inner.insert_outbox(outbox, now))
    }
}

#[async_trait]
impl OutboxStore for MemoryBackend {
    async fn claim_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let inner = self.inner.lock();
        let mut pending: Vec<OutboxEntry> = inner
            .outbox
            .iter()
            .filter(|e| !e.published)
            .cloned()
            .collect();
        pending.sort_by_key(|e| (e.created_at, e.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_published(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "outbox entry",
                id: id.to_string(),
            })?;
        entry.published = true;
        entry.published_at = Some(Utc::now());
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "outbox entry",
                id: id.to_string(),
            })?;
        entry.retry_count += 1;
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn count_unpublished(&self) -> Result<i64, StoreError> {
        Ok(self.inner.lock().outbox.iter().filter(|e| !e.published).count() as i64)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryBackend {
    async fn register(&self, new: NewSubscription) -> Result<Subscription, StoreError> {
        if !new.has_single_target() {
            return Err(StoreError::InvalidSubscriptionTarget(
                "exactly one of request_id and topic must be set".to_string(),
            ));
        }
        let mut inner = self.inner.lock();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            status: SubscriptionStatus::Active,
            request_id: new.request_id,
            topic: new.topic,
            endpoint_url: new.endpoint_url,
            secret: new.secret,
            headers: new.headers,
            expires_at: new.expires_at,
            failure_count: 0,
            created_at: Utc::now(),
        };
        inner.subscriptions.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        Ok(self.inner.lock().subscriptions.get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.lock().subscriptions.remove(&id).is_some())
    }

    async fn list_active_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<Subscription>, StoreError> {
        let now = Utc::now();
        Ok(self
            .inner
            .lock()
            .subscriptions
            .values()
            .filter(|s| {
                s.request_id == Some(request_id)
                    && s.status == SubscriptionStatus::Active
                    && s.expires_at.map(|e| e > now).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn list_active_for_topic(&self, topic: &str) -> Result<Vec<Subscription>, StoreError> {
        let now = Utc::now();
        Ok(self
            .inner
            .lock()
            .subscriptions
            .values()
            .filter(|s| {
                s.topic.as_deref() == Some(topic)
                    && s.status == SubscriptionStatus::Active
                    && s.expires_at.map(|e| e > now).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn record_delivery_failure(&self, id: Uuid) -> Result<i32, StoreError> {
        let mut inner = self.inner.lock();
        let subscription = inner
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "subscription",
                id: id.to_string(),
            })?;
        subscription.failure_count += 1;
        Ok(subscription.failure_count)
    }

    async fn disable(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let subscription = inner
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "subscription",
                id: id.to_string(),
            })?;
        subscription.status = SubscriptionStatus::Error;
        Ok(())
    }
}

/// In-memory idempotency gate with passive expiry.
#[derive(Clone, Default)]
pub struct MemoryIdempotencyStore {
    entries: Arc<Mutex<HashMap<(String, String), IdempotencyEntry>>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn check_and_set(
        &self,
        tenant: &str,
        key: &str,
        request_id: Uuid,
        ttl: Duration,
    ) -> Result<Option<IdempotencyEntry>, StoreError> {
        let mut entries = self.entries.lock();
        let now = Utc::now();
        let composite = (tenant.to_string(), key.to_string());

        if let Some(existing) = entries.get(&composite) {
            if !existing.is_expired(now) {
                return Ok(Some(existing.clone()));
            }
        }

        entries.insert(
            composite,
            IdempotencyEntry {
                tenant: tenant.to_string(),
                key: key.to_string(),
                request_id,
                fingerprint: None,
                outcome: None,
                expires_at: now
                    + chrono::Duration::from_std(ttl)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                created_at: now,
            },
        );
        Ok(None)
    }

    async fn commit(
        &self,
        tenant: &str,
        key: &str,
        fingerprint: &str,
        outcome: &str,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&(tenant.to_string(), key.to_string())) {
            entry.fingerprint = Some(fingerprint.to_string());
            entry.outcome = Some(outcome.to_string());
        }
        Ok(())
    }

    async fn remove(&self, tenant: &str, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .remove(&(tenant.to_string(), key.to_string()));
        Ok(())
    }
}
