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

//! Transactional Outbox model.
//!
//! An outbox entry records the intent to publish one queue message. Entries
//! are only ever created inside the same database transaction as the request
//! record mutation that logically requires them, which is what makes the
//! record change and the message send an all-or-nothing pair across process
//! crashes. A separate publisher drains unpublished entries and marks them
//! published, giving at-least-once delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::PipelineStage;

use super::request::BlobPointer;

/// Represents an outbox entry (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Auto-incrementing primary key (BIGSERIAL).
    pub id: i64,
    /// Destination queue name.
    pub destination: String,
    /// Per-key ordering key for the queue; always the request id so that
    /// stage messages for one request stay ordered.
    pub message_key: String,
    /// Serialized message body.
    pub body: String,
    /// Whether a publish attempt has succeeded for this entry.
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    /// Number of publish attempts that have failed.
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Structure for creating new outbox entries.
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub destination: String,
    pub message_key: String,
    pub body: String,
}

impl NewOutboxEntry {
    /// Builds the outbox entry for the next pipeline stage of a request.
    ///
    /// The body references the payload by blob pointer rather than inlining
    /// it, keeping queue messages small.
    pub fn for_stage(
        destination: impl Into<String>,
        request_id: Uuid,
        tenant: &str,
        stage: PipelineStage,
        payload: &BlobPointer,
    ) -> Self {
        let body = serde_json::json!({
            "request_id": request_id,
            "tenant": tenant,
            "stage": stage.as_str(),
            "payload": { "bucket": payload.bucket, "key": payload.key },
        })
        .to_string();

        Self {
            destination: destination.into(),
            message_key: request_id.to_string(),
            body,
        }
    }
}
