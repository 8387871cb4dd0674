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

//! PostgreSQL-specific row models.
//!
//! Diesel model definitions using native PostgreSQL types, converted to and
//! from domain types at the store boundary. Status and stage columns are
//! stored as text; a value that fails to parse back surfaces as
//! [`StoreError::Corrupt`] rather than a panic.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::{idempotency_keys, outbox, requests, subscriptions};
use crate::error::StoreError;
use crate::models::{
    BlobPointer, IdempotencyEntry, OutboxEntry, RequestRecord, Subscription, SubscriptionStatus,
};
use crate::state::{PipelineStage, RequestStatus};

// ============================================================================
// Request Models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PgRequest {
    pub id: Uuid,
    pub tenant: String,
    pub correlation_id: String,
    pub idempotency_key: Option<String>,
    pub external_ref: Option<String>,
    pub status: String,
    pub last_stage: Option<String>,
    pub next_stage: Option<String>,
    pub resolved_sync: bool,
    pub queued_async: bool,
    pub payload_bucket: String,
    pub payload_key: String,
    pub result_bucket: Option<String>,
    pub result_key: Option<String>,
    pub patient_ref: Option<String>,
    pub provider_ref: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
    pub related_request_id: Option<Uuid>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = requests)]
pub struct NewPgRequest {
    pub id: Uuid,
    pub tenant: String,
    pub correlation_id: String,
    pub idempotency_key: Option<String>,
    pub status: String,
    pub last_stage: Option<String>,
    pub next_stage: Option<String>,
    pub payload_bucket: String,
    pub payload_key: String,
    pub patient_ref: Option<String>,
    pub provider_ref: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
    pub related_request_id: Option<Uuid>,
}

fn parse_stage(s: Option<&str>) -> Result<Option<PipelineStage>, StoreError> {
    s.map(|v| {
        PipelineStage::parse(v)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown pipeline stage '{}'", v)))
    })
    .transpose()
}

impl TryFrom<PgRequest> for RequestRecord {
    type Error = StoreError;

    fn try_from(row: PgRequest) -> Result<Self, StoreError> {
        let status = RequestStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{}'", row.status)))?;
        let result = match (row.result_bucket, row.result_key) {
            (Some(bucket), Some(key)) => Some(BlobPointer { bucket, key }),
            _ => None,
        };

        Ok(RequestRecord {
            id: row.id,
            tenant: row.tenant,
            correlation_id: row.correlation_id,
            idempotency_key: row.idempotency_key,
            external_ref: row.external_ref,
            status,
            last_stage: parse_stage(row.last_stage.as_deref())?,
            next_stage: parse_stage(row.next_stage.as_deref())?,
            resolved_sync: row.resolved_sync,
            queued_async: row.queued_async,
            payload: BlobPointer {
                bucket: row.payload_bucket,
                key: row.payload_key,
            },
            result,
            patient_ref: row.patient_ref,
            provider_ref: row.provider_ref,
            service_date: row.service_date,
            related_request_id: row.related_request_id,
            error_code: row.error_code,
            error_message: row.error_message,
            retry_count: row.retry_count,
            received_at: row.received_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

// ============================================================================
// Outbox Models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PgOutboxEntry {
    pub id: i64,
    pub destination: String,
    pub message_key: String,
    pub body: String,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = outbox)]
pub struct NewPgOutboxEntry {
    pub destination: String,
    pub message_key: String,
    pub body: String,
}

impl From<PgOutboxEntry> for OutboxEntry {
    fn from(row: PgOutboxEntry) -> Self {
        OutboxEntry {
            id: row.id,
            destination: row.destination,
            message_key: row.message_key,
            body: row.body,
            published: row.published,
            published_at: row.published_at,
            retry_count: row.retry_count,
            last_error: row.last_error,
            created_at: row.created_at,
        }
    }
}

// ============================================================================
// Subscription Models
// ============================================================================

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PgSubscription {
    pub id: Uuid,
    pub status: String,
    pub request_id: Option<Uuid>,
    pub topic: Option<String>,
    pub endpoint_url: String,
    pub secret: Option<String>,
    pub headers: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = subscriptions)]
pub struct NewPgSubscription {
    pub status: String,
    pub request_id: Option<Uuid>,
    pub topic: Option<String>,
    pub endpoint_url: String,
    pub secret: Option<String>,
    pub headers: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgSubscription> for Subscription {
    type Error = StoreError;

    fn try_from(row: PgSubscription) -> Result<Self, StoreError> {
        let status = SubscriptionStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown subscription status '{}'", row.status))
        })?;
        let headers: Vec<(String, String)> = serde_json::from_value(row.headers)
            .map_err(|e| StoreError::Corrupt(format!("bad subscription headers: {}", e)))?;

        Ok(Subscription {
            id: row.id,
            status,
            request_id: row.request_id,
            topic: row.topic,
            endpoint_url: row.endpoint_url,
            secret: row.secret,
            headers,
            expires_at: row.expires_at,
            failure_count: row.failure_count,
            created_at: row.created_at,
        })
    }
}

// ============================================================================
// Idempotency Models
// ============================================================================

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = idempotency_keys)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PgIdempotencyEntry {
    pub tenant: String,
    pub key: String,
    pub request_id: Uuid,
    pub fingerprint: Option<String>,
    pub outcome: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<PgIdempotencyEntry> for IdempotencyEntry {
    fn from(row: PgIdempotencyEntry) -> Self {
        IdempotencyEntry {
            tenant: row.tenant,
            key: row.key,
            request_id: row.request_id,
            fingerprint: row.fingerprint,
            outcome: row.outcome,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}
