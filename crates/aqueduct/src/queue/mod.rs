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

//! Queue publisher interface.
//!
//! The engine is a client of a durable, at-least-once message queue with
//! per-key ordering. Stage messages are keyed by request id, so the queue's
//! per-key ordering guarantee keeps one request's stage messages ordered;
//! no ordering exists across requests.

#[cfg(feature = "kafka")]
mod kafka;
mod memory;

#[cfg(feature = "kafka")]
pub use kafka::KafkaQueuePublisher;
pub use memory::MemoryQueue;

use async_trait::async_trait;

use crate::error::QueueError;

/// Capability interface for publishing to the durable queue.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publishes one message to `destination` with the given ordering key.
    ///
    /// The publish is at-least-once from the caller's perspective: a
    /// success that is observed but not durably recorded (crash between
    /// send and bookkeeping) will be retried, so consumers must deduplicate
    /// by request id.
    async fn publish(&self, destination: &str, key: &str, body: &str) -> Result<(), QueueError>;
}
