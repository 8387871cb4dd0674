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

//! Domain models for the orchestration and delivery engine.
//!
//! These are backend-agnostic types used in business logic and at the API
//! boundary. Persistent backends convert to and from their own row types at
//! the store boundary.

pub mod idempotency;
pub mod outbox;
pub mod request;
pub mod subscription;

pub use idempotency::IdempotencyEntry;
pub use outbox::{NewOutboxEntry, OutboxEntry};
pub use request::{BlobPointer, NewRequestRecord, RequestRecord};
pub use subscription::{NewSubscription, Subscription, SubscriptionStatus};
