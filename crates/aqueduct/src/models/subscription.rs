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

//! Webhook subscription model.
//!
//! A subscription registers an external HTTP endpoint to be notified when a
//! request reaches a terminal state. It targets either one request id or a
//! topic; terminal events are published on the topic named after the
//! request's tenant, so a topic subscription receives every terminal event
//! in that tenant.
//!
//! Subscriptions accumulate a failure count across delivery invocations;
//! past the configured ceiling the subscription is durably disabled and no
//! further attempts are made until it is recreated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    /// Deliveries are attempted.
    Active,
    /// Too many consecutive failures; deliveries are suppressed.
    Error,
    /// Administratively switched off.
    Off,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "Active",
            SubscriptionStatus::Error => "Error",
            SubscriptionStatus::Off => "Off",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(SubscriptionStatus::Active),
            "Error" => Some(SubscriptionStatus::Error),
            "Off" => Some(SubscriptionStatus::Off),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Represents a webhook subscription (domain type).
///
/// Exactly one of `request_id` and `topic` is set; the stores enforce this
/// at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub status: SubscriptionStatus,
    /// The request this subscription watches; `None` for topic
    /// subscriptions.
    pub request_id: Option<Uuid>,
    /// The topic this subscription watches; terminal events are published
    /// on the tenant's topic.
    pub topic: Option<String>,
    /// Endpoint to POST notifications to.
    pub endpoint_url: String,
    /// Shared secret for HMAC signing of the notification payload.
    pub secret: Option<String>,
    /// Custom headers attached to every delivery, as (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Subscriptions past their expiry are skipped during delivery.
    pub expires_at: Option<DateTime<Utc>>,
    /// Failed delivery invocations accumulated so far.
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Structure for creating new subscriptions.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub request_id: Option<Uuid>,
    pub topic: Option<String>,
    pub endpoint_url: String,
    pub secret: Option<String>,
    pub headers: Vec<(String, String)>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewSubscription {
    /// True when exactly one of the two targets is set.
    pub fn has_single_target(&self) -> bool {
        self.request_id.is_some() != self.topic.is_some()
    }
}
