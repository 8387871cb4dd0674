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

//! Request Record model.
//!
//! One record per submission, keyed by a request id assigned at intake. The
//! record is the unit of concurrency control: all transitions are applied as
//! conditional updates against it, and the two completion flags implement
//! the race-safe hand-off between the synchronous and asynchronous paths.
//!
//! Large payloads never live in the record itself; the record carries blob
//! store pointers instead so that queue messages and rows stay small.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{PipelineStage, RequestStatus};

/// A bucket + key address into the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobPointer {
    pub bucket: String,
    pub key: String,
}

impl BlobPointer {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Represents a tracked request (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Globally unique request id assigned at intake.
    pub id: Uuid,
    /// Tenant the submission belongs to.
    pub tenant: String,
    /// Caller-supplied correlation / bundle identifier.
    pub correlation_id: String,
    /// Caller-supplied idempotency key, if any.
    pub idempotency_key: Option<String>,
    /// Tracking reference assigned by the downstream system, once known.
    pub external_ref: Option<String>,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Last pipeline stage that completed.
    pub last_stage: Option<PipelineStage>,
    /// Next pipeline stage to run.
    pub next_stage: Option<PipelineStage>,
    /// True once the request was resolved inline by the synchronous path.
    /// Mutually exclusive with `queued_async`; set by conditional update.
    pub resolved_sync: bool,
    /// True once the request was handed off to the asynchronous pipeline.
    /// Mutually exclusive with `resolved_sync`; set by conditional update.
    pub queued_async: bool,
    /// Blob pointer to the original submission payload.
    pub payload: BlobPointer,
    /// Blob pointer to the final result, once produced.
    pub result: Option<BlobPointer>,
    /// Lookup columns extracted from the payload for inquiry support.
    pub patient_ref: Option<String>,
    pub provider_ref: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
    /// Reference to the originating record for update/cancel modifications.
    pub related_request_id: Option<Uuid>,
    /// Last error code recorded by a pipeline stage.
    pub error_code: Option<String>,
    /// Last error message recorded by a pipeline stage.
    pub error_message: Option<String>,
    /// Number of stage-level retries recorded against this request.
    pub retry_count: i32,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RequestRecord {
    /// True when the record sits in a terminal lifecycle state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Structure for creating new request records.
#[derive(Debug, Clone)]
pub struct NewRequestRecord {
    pub id: Uuid,
    pub tenant: String,
    pub correlation_id: String,
    pub idempotency_key: Option<String>,
    pub payload: BlobPointer,
    pub patient_ref: Option<String>,
    pub provider_ref: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
    pub related_request_id: Option<Uuid>,
}
