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

//! Idempotency entry model.
//!
//! One entry per reserved (tenant, caller key) pair. An entry maps the pair
//! to at most one request id for its lifetime; entries expire passively
//! after the configured TTL, after which the same key is treated as new.
//! That expiry is a documented at-least-once-not-forever guarantee, not a
//! bug.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a reserved idempotency key (domain type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub tenant: String,
    pub key: String,
    /// The request id the key was collapsed onto.
    pub request_id: Uuid,
    /// Fingerprint of the response returned for the original submission,
    /// recorded once the outcome is known.
    pub fingerprint: Option<String>,
    /// Logical outcome code of the original submission (`resolved`,
    /// `pended`, ...), recorded once known.
    pub outcome: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyEntry {
    /// True once the entry's TTL has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
