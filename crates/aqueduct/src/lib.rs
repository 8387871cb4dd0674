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

//! # Aqueduct
//!
//! A compliance-bound request gateway. Aqueduct accepts structured
//! submissions on behalf of multiple tenants, attempts to resolve each one
//! synchronously within a hard deadline, and hands anything unresolved to an
//! asynchronous processing pipeline without ever losing or double-processing
//! a request.
//!
//! ## Core guarantees
//!
//! - **Exactly one completion path.** Every request ends either resolved
//!   synchronously or queued asynchronously, decided by two mutually
//!   exclusive flags claimed with atomic conditional updates. A late
//!   synchronous result and the hand-off race; the store picks exactly one
//!   winner.
//! - **Transactional outbox.** Pipeline hand-off events are written in the
//!   same database transaction as the lifecycle transition that requires
//!   them, then drained to the queue by a background publisher.
//!   Delivery is at least once; consumers deduplicate by request id.
//! - **Idempotent intake.** A caller-supplied idempotency key collapses
//!   retries onto one request id for a configurable TTL.
//!
//! ## Components
//!
//! - [`gateway::Gateway`] is the caller-facing facade: submit, inquiry,
//!   status, update, cancel, and subscription management.
//! - [`coordinator::SyncCoordinator`] runs the deadline-bounded synchronous
//!   resolution attempt.
//! - [`publisher::OutboxPublisher`] drains the outbox to the queue.
//! - [`notifier::SubscriptionNotifier`] delivers signed webhook
//!   notifications when requests reach a terminal state.
//! - [`store`] defines the storage traits, with an in-memory backend for
//!   tests and a PostgreSQL backend behind the `postgres` feature.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aqueduct::blob::MemoryBlobStore;
//! use aqueduct::config::GatewayConfig;
//! use aqueduct::coordinator::SyncCoordinator;
//! use aqueduct::gateway::{Gateway, SubmitRequest};
//! use aqueduct::notifier::{HttpTransport, SubscriptionNotifier};
//! use aqueduct::steps::{NoopRuleStep, NoopTransformStep};
//! use aqueduct::store::memory::{MemoryBackend, MemoryIdempotencyStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::default();
//! let store = Arc::new(MemoryBackend::new());
//! let blob = Arc::new(MemoryBlobStore::new());
//!
//! let coordinator = SyncCoordinator::new(
//!     store.clone(),
//!     blob.clone(),
//!     Arc::new(NoopTransformStep),
//!     Arc::new(NoopRuleStep),
//!     config.clone(),
//! );
//! let notifier = SubscriptionNotifier::new(
//!     store.clone(),
//!     Arc::new(HttpTransport::new(config.notifier_timeout())?),
//!     config.clone(),
//! );
//! let gateway = Gateway::new(
//!     store.clone(),
//!     store.clone(),
//!     Arc::new(MemoryIdempotencyStore::new()),
//!     blob,
//!     coordinator,
//!     notifier,
//!     config,
//! );
//!
//! let outcome = gateway
//!     .submit(SubmitRequest {
//!         tenant: "tenant-a".to_string(),
//!         correlation_id: "bundle-1".to_string(),
//!         caller_identity: "clinic-1".to_string(),
//!         idempotency_key: Some("key-1".to_string()),
//!         payload: serde_json::json!({ "correlation_id": "bundle-1" }),
//!         sync_mode: true,
//!         patient_ref: None,
//!         provider_ref: None,
//!         service_date: None,
//!     })
//!     .await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod config;
pub mod coordinator;
#[cfg(feature = "postgres")]
pub mod database;
pub mod error;
pub mod gateway;
pub mod models;
pub mod modification;
pub mod notifier;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod state;
pub mod steps;
pub mod store;

pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use coordinator::{AttemptOutcome, SyncCoordinator};
pub use error::{
    ConfigError, CoordinatorError, GatewayError, NotifyError, PublishError, StoreError,
};
pub use gateway::{Gateway, InquiryOutcome, InquiryQuery, SubmitOutcome, SubmitRequest};
pub use models::{
    IdempotencyEntry, NewRequestRecord, NewSubscription, OutboxEntry, RequestRecord, Subscription,
};
pub use modification::{ModificationCoordinator, ModifyOutcome};
pub use notifier::SubscriptionNotifier;
pub use publisher::OutboxPublisher;
pub use state::{PipelineStage, RequestStatus};
pub use steps::{Decision, FieldError, RuleStep, StepOutcome, TransformStep};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes structured logging from `RUST_LOG`, defaulting to `info`.
///
/// Intended for binaries and examples; libraries embedding aqueduct should
/// install their own subscriber instead.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
