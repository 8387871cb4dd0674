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

//! Error types for the orchestration and delivery engine.
//!
//! Errors are grouped per concern. The taxonomy matters for propagation:
//! caller errors surface immediately and are not retried, transient
//! downstream errors are absorbed as "inconclusive" by the coordinator,
//! and delivery errors (outbox publish, webhook POST) only ever surface as
//! retry counters, never as request-level failures.

use thiserror::Error;
use uuid::Uuid;

use crate::state::RequestStatus;

/// Errors from request/outbox/subscription stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to get a connection from the pool.
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// Underlying database error.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// A record with this id already exists.
    #[error("Request record already exists: {0}")]
    DuplicateRequest(Uuid),

    /// The referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The requested lifecycle transition is not legal.
    #[error("Invalid transition: {from} -> {to} for request {id}")]
    InvalidTransition {
        id: Uuid,
        from: RequestStatus,
        to: RequestStatus,
    },

    /// A subscription must target exactly one of a request or a topic.
    #[error("Invalid subscription target: {0}")]
    InvalidSubscriptionTarget(String),

    /// A stored enum or column failed to parse back into its domain type.
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from queue publish attempts.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Publish to '{destination}' failed: {message}")]
    Publish { destination: String, message: String },
}

/// Errors from downstream transformation/validation step calls.
///
/// These are transport-level failures. The coordinator treats them as
/// "inconclusive" and falls back to the asynchronous path rather than
/// failing the request.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step transport error: {0}")]
    Transport(String),

    #[error("Step call timed out")]
    Timeout,

    #[error("Step returned malformed response: {0}")]
    MalformedResponse(String),
}

/// Errors from the synchronous processing coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    /// The spawned attempt task panicked or was aborted.
    #[error("Processing attempt aborted: {0}")]
    AttemptAborted(String),
}

/// Errors from the outbox publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors from webhook notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Webhook transport error: {0}")]
    Transport(String),

    #[error("Webhook endpoint returned status {0}")]
    Status(u16),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the gateway facade.
///
/// Callers always receive one of the logical outcomes; this type covers
/// internal failures only (storage down, blob store unwritable), which the
/// facade maps to a synthesized error outcome.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Errors from configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
