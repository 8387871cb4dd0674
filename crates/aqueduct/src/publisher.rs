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

//! Transactional outbox publisher.
//!
//! Periodically drains unpublished outbox entries to the queue. Each entry
//! is marked published in its own transaction only after the send succeeds;
//! a crash between send and mark leaves the entry claimable, so delivery is
//! at-least-once and downstream consumers deduplicate by request id.
//!
//! A failed publish never fails the request it belongs to. The entry's
//! retry count and last error are recorded and the entry is retried on the
//! next cycle.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::PublishError;
use crate::queue::QueuePublisher;
use crate::store::OutboxStore;

pub struct OutboxPublisher {
    store: Arc<dyn OutboxStore>,
    queue: Arc<dyn QueuePublisher>,
    config: GatewayConfig,
}

impl OutboxPublisher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        queue: Arc<dyn QueuePublisher>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Runs the publisher loop until a shutdown signal arrives. A final
    /// drain runs on shutdown so entries created just before the signal are
    /// not left waiting for a restart.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval = ?self.config.publisher_poll_interval(),
            batch_size = self.config.publisher_batch_size(),
            "Starting outbox publisher"
        );
        let mut interval = tokio::time::interval(self.config.publisher_poll_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!("Outbox drain cycle failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Outbox publisher shutdown requested, running final drain");
                    if let Err(e) = self.drain_once().await {
                        error!("Final outbox drain failed: {}", e);
                    }
                    break;
                }
            }
        }
    }

    /// Claims one batch and publishes it; returns how many entries were
    /// published. Per-entry publish failures are recorded and skipped, they
    /// do not abort the batch.
    pub async fn drain_once(&self) -> Result<usize, PublishError> {
        let batch = self
            .store
            .claim_unpublished(self.config.publisher_batch_size())
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }
        debug!(count = batch.len(), "Claimed outbox batch");

        let mut published = 0;
        for entry in batch {
            match self
                .queue
                .publish(&entry.destination, &entry.message_key, &entry.body)
                .await
            {
                Ok(()) => {
                    self.store.mark_published(entry.id).await?;
                    metrics::counter!("aqueduct_outbox_published_total").increment(1);
                    published += 1;
                }
                Err(e) => {
                    warn!(
                        outbox_id = entry.id,
                        destination = %entry.destination,
                        retry_count = entry.retry_count,
                        "Outbox publish failed: {}", e
                    );
                    metrics::counter!("aqueduct_outbox_publish_failures_total").increment(1);
                    self.store.record_failure(entry.id, &e.to_string()).await?;
                }
            }
        }

        let backlog = self.store.count_unpublished().await?;
        metrics::gauge!("aqueduct_outbox_backlog").set(backlog as f64);
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlobPointer, NewOutboxEntry, NewRequestRecord};
    use crate::queue::MemoryQueue;
    use crate::state::{PipelineStage, RequestStatus};
    use crate::store::memory::MemoryBackend;
    use crate::store::{RequestStore, StatusUpdate};
    use uuid::Uuid;

    async fn seed_entry(store: &MemoryBackend) -> Uuid {
        let id = Uuid::new_v4();
        let record = store
            .create(NewRequestRecord {
                id,
                tenant: "tenant-a".to_string(),
                correlation_id: "corr".to_string(),
                idempotency_key: None,
                payload: BlobPointer::new("artifacts", format!("tenant-a/{}/intake/payload.json", id)),
                patient_ref: None,
                provider_ref: None,
                service_date: None,
                related_request_id: None,
            })
            .await
            .unwrap();
        store
            .update_status_with_outbox(
                id,
                StatusUpdate::to(RequestStatus::Received)
                    .with_stages(Some(PipelineStage::Intake), Some(PipelineStage::Parse)),
                NewOutboxEntry::for_stage(
                    "aqueduct.pipeline",
                    id,
                    "tenant-a",
                    PipelineStage::Parse,
                    &record.payload,
                ),
            )
            .await
            .unwrap();
        id
    }

    fn publisher(store: Arc<MemoryBackend>, queue: Arc<MemoryQueue>) -> OutboxPublisher {
        OutboxPublisher::new(store, queue, GatewayConfig::default())
    }

    #[tokio::test]
    async fn test_drain_publishes_and_marks() {
        let store = Arc::new(MemoryBackend::new());
        let queue = Arc::new(MemoryQueue::new());
        let id = seed_entry(&store).await;

        let p = publisher(store.clone(), queue.clone());
        assert_eq!(p.drain_once().await.unwrap(), 1);
        assert_eq!(store.count_unpublished().await.unwrap(), 0);
        assert_eq!(queue.messages_for_key(&id.to_string()).len(), 1);

        // Nothing left; the next cycle is a no-op.
        assert_eq!(p.drain_once().await.unwrap(), 0);
        assert_eq!(queue.messages_for_key(&id.to_string()).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_publish_recorded_and_retried() {
        let store = Arc::new(MemoryBackend::new());
        let queue = Arc::new(MemoryQueue::new());
        let id = seed_entry(&store).await;

        queue.set_failing(true);
        let p = publisher(store.clone(), queue.clone());
        assert_eq!(p.drain_once().await.unwrap(), 0);
        assert_eq!(store.count_unpublished().await.unwrap(), 1);

        let entry = &store.claim_unpublished(10).await.unwrap()[0];
        assert_eq!(entry.retry_count, 1);
        assert!(entry.last_error.is_some());

        // Queue recovers; the entry goes out on the next cycle.
        queue.set_failing(false);
        assert_eq!(p.drain_once().await.unwrap(), 1);
        assert_eq!(queue.messages_for_key(&id.to_string()).len(), 1);
    }

    #[tokio::test]
    async fn test_batch_preserves_creation_order() {
        let store = Arc::new(MemoryBackend::new());
        let queue = Arc::new(MemoryQueue::new());
        let first = seed_entry(&store).await;
        let second = seed_entry(&store).await;

        let p = publisher(store.clone(), queue.clone());
        assert_eq!(p.drain_once().await.unwrap(), 2);

        let messages = queue.messages();
        assert_eq!(messages[0].key, first.to_string());
        assert_eq!(messages[1].key, second.to_string());
    }

    #[tokio::test]
    async fn test_shutdown_runs_final_drain() {
        let store = Arc::new(MemoryBackend::new());
        let queue = Arc::new(MemoryQueue::new());
        seed_entry(&store).await;

        let (tx, rx) = broadcast::channel(1);
        let p = Arc::new(publisher(store.clone(), queue.clone()));
        let runner = {
            let p = p.clone();
            tokio::spawn(async move { p.run(rx).await })
        };

        tx.send(()).unwrap();
        runner.await.unwrap();
        assert_eq!(store.count_unpublished().await.unwrap(), 0);
    }
}
