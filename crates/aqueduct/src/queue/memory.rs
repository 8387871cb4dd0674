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

//! In-memory queue for tests and single-process deployments.
//!
//! Records published messages in order and can be put into a failing mode
//! to exercise the publisher's retry bookkeeping.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::QueueError;

use super::QueuePublisher;

/// One captured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub destination: String,
    pub key: String,
    pub body: String,
}

/// Queue publisher backed by a process-local vec.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<PublishedMessage>>,
    failing: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every publish fails. Used to exercise retry bookkeeping.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All messages published so far, in publish order.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }

    /// Messages published for one ordering key, in publish order.
    pub fn messages_for_key(&self, key: &str) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.key == key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueuePublisher for MemoryQueue {
    async fn publish(&self, destination: &str, key: &str, body: &str) -> Result<(), QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Publish {
                destination: destination.to_string(),
                message: "queue unavailable".to_string(),
            });
        }
        self.messages.lock().push(PublishedMessage {
            destination: destination.to_string(),
            key: key.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
