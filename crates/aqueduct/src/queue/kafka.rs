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

//! Kafka-backed queue publisher.
//!
//! Keys carry the request id, so partition assignment preserves per-request
//! message order. `acks=all` because the outbox only marks an entry
//! published after the broker confirms it.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::future_producer::Delivery;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::debug;

use crate::error::QueueError;

use super::QueuePublisher;

/// Queue publisher over a Kafka (or Kafka-compatible) cluster.
pub struct KafkaQueuePublisher {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaQueuePublisher {
    /// Creates a publisher connected to `brokers`.
    pub fn new(brokers: &str, send_timeout: Duration) -> Result<Self, QueueError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set(
                "message.timeout.ms",
                send_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| QueueError::Publish {
                destination: brokers.to_string(),
                message: format!("failed to create producer: {}", e),
            })?;

        Ok(Self {
            producer,
            send_timeout,
        })
    }
}

#[async_trait]
impl QueuePublisher for KafkaQueuePublisher {
    async fn publish(&self, destination: &str, key: &str, body: &str) -> Result<(), QueueError> {
        let record = FutureRecord::to(destination).payload(body).key(key);

        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok(Delivery {
                partition, offset, ..
            }) => {
                debug!(
                    destination,
                    key, partition, offset, "Published queue message"
                );
                Ok(())
            }
            Err((kafka_error, _)) => Err(QueueError::Publish {
                destination: destination.to_string(),
                message: kafka_error.to_string(),
            }),
        }
    }
}
