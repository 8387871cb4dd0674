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

//! Subscription notifier.
//!
//! Delivers webhook notifications when a request reaches a terminal state.
//! Delivery is best-effort with bounded retries per triggering event; a
//! failed delivery only ever increments the subscription's failure counter
//! and never propagates to the state transition that triggered it. Past the
//! configured failure threshold the subscription is durably disabled.
//!
//! When the subscription carries a shared secret, the payload is signed
//! with HMAC-SHA256 and the hex digest is sent in `X-Aqueduct-Signature`.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::NotifyError;
use crate::models::{RequestRecord, Subscription};
use crate::store::SubscriptionStore;

type HmacSha256 = Hmac<Sha256>;

/// Signature header attached to signed deliveries.
pub const SIGNATURE_HEADER: &str = "X-Aqueduct-Signature";

/// One webhook POST, ready for the transport.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub body: String,
    pub headers: HashMap<String, String>,
}

/// Transport seam for webhook deliveries; HTTP in production, recorded
/// in-process for tests.
#[async_trait::async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, request: &WebhookRequest) -> Result<(), NotifyError>;
}

/// `reqwest`-backed transport. Any non-2xx status counts as a failed
/// delivery.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: std::time::Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl NotificationTransport for HttpTransport {
    async fn deliver(&self, request: &WebhookRequest) -> Result<(), NotifyError> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

pub struct SubscriptionNotifier {
    subscriptions: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn NotificationTransport>,
    config: GatewayConfig,
}

impl SubscriptionNotifier {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn NotificationTransport>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            subscriptions,
            transport,
            config,
        }
    }

    /// Notifies every active subscription watching `record`, whether it
    /// targets the request directly or the tenant's topic. Infallible:
    /// delivery failures are absorbed into per-subscription bookkeeping.
    pub async fn notify_terminal(&self, record: &RequestRecord) {
        let mut subscriptions = match self
            .subscriptions
            .list_active_for_request(record.id)
            .await
        {
            Ok(list) => list,
            Err(e) => {
                warn!(request_id = %record.id, error = %e, "Failed to list subscriptions");
                return;
            }
        };
        // Terminal events are published on the tenant-wide topic.
        match self.subscriptions.list_active_for_topic(&record.tenant).await {
            Ok(mut topical) => subscriptions.append(&mut topical),
            Err(e) => {
                warn!(request_id = %record.id, error = %e, "Failed to list topic subscriptions");
            }
        }
        if subscriptions.is_empty() {
            return;
        }

        let body = notification_body(record);
        for subscription in subscriptions {
            self.deliver_with_retry(&subscription, &body).await;
        }
    }

    async fn deliver_with_retry(&self, subscription: &Subscription, body: &str) {
        let request = build_request(subscription, body);

        let max_attempts = self.config.notifier_max_retries() + 1;
        for attempt in 0..max_attempts {
            if attempt > 0 {
                // The first retry waits the policy's initial delay.
                let delay = self.config.notifier_backoff().delay_for_attempt(attempt - 1);
                tokio::time::sleep(delay).await;
            }
            match self.transport.deliver(&request).await {
                Ok(()) => {
                    debug!(
                        subscription_id = %subscription.id,
                        attempt,
                        "Webhook delivered"
                    );
                    metrics::counter!("aqueduct_webhook_delivered_total").increment(1);
                    return;
                }
                Err(e) => {
                    debug!(
                        subscription_id = %subscription.id,
                        attempt,
                        "Webhook delivery attempt failed: {}", e
                    );
                }
            }
        }

        metrics::counter!("aqueduct_webhook_exhausted_total").increment(1);
        self.record_exhausted(subscription).await;
    }

    /// Bumps the failure counter and disables the subscription once it
    /// crosses the threshold.
    async fn record_exhausted(&self, subscription: &Subscription) {
        let count = match self
            .subscriptions
            .record_delivery_failure(subscription.id)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(subscription_id = %subscription.id, error = %e, "Failed to record delivery failure");
                return;
            }
        };
        warn!(
            subscription_id = %subscription.id,
            failure_count = count,
            "Webhook delivery exhausted retries"
        );

        if count >= self.config.subscription_failure_threshold() {
            match self.subscriptions.disable(subscription.id).await {
                Ok(()) => info!(
                    subscription_id = %subscription.id,
                    "Subscription disabled after repeated delivery failures"
                ),
                Err(e) => warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Failed to disable subscription"
                ),
            }
        }
    }
}

fn notification_body(record: &RequestRecord) -> String {
    serde_json::json!({
        "request_id": record.id,
        "status": record.status.as_str(),
        "error_code": record.error_code,
        "result": record.result,
        "completed_at": record.completed_at,
    })
    .to_string()
}

fn build_request(subscription: &Subscription, body: &str) -> WebhookRequest {
    let mut headers: HashMap<String, String> = subscription.headers.iter().cloned().collect();
    if let Some(secret) = &subscription.secret {
        headers.insert(SIGNATURE_HEADER.to_string(), sign(secret, body));
    }
    WebhookRequest {
        url: subscription.endpoint_url.clone(),
        body: body.to_string(),
        headers,
    }
}

/// Hex HMAC-SHA256 digest of `body` under `secret`.
fn sign(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlobPointer, NewRequestRecord, NewSubscription};
    use crate::retry::BackoffPolicy;
    use crate::state::RequestStatus;
    use crate::store::memory::MemoryBackend;
    use crate::store::{RequestStore, StatusUpdate};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingTransport {
        deliveries: Mutex<Vec<WebhookRequest>>,
        failures_before_success: AtomicUsize,
    }

    impl RecordingTransport {
        fn failing(n: usize) -> Self {
            let t = Self::default();
            t.failures_before_success.store(n, Ordering::SeqCst);
            t
        }
    }

    #[async_trait::async_trait]
    impl NotificationTransport for RecordingTransport {
        async fn deliver(&self, request: &WebhookRequest) -> Result<(), NotifyError> {
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(NotifyError::Status(503));
            }
            self.deliveries.lock().push(request.clone());
            Ok(())
        }
    }

    fn fast_config() -> GatewayConfig {
        GatewayConfig::builder()
            .notifier_max_retries(2)
            .notifier_backoff(BackoffPolicy {
                initial_delay: Duration::from_millis(1),
                multiplier: 1.0,
                max_delay: Duration::from_millis(2),
                with_jitter: false,
            })
            .subscription_failure_threshold(2)
            .build()
            .unwrap()
    }

    async fn terminal_record(store: &MemoryBackend) -> RequestRecord {
        let id = Uuid::new_v4();
        store
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
            .update_status(id, StatusUpdate::to(RequestStatus::Completed))
            .await
            .unwrap()
    }

    async fn subscribe(store: &MemoryBackend, request_id: Uuid, secret: Option<&str>) -> Subscription {
        store
            .register(NewSubscription {
                request_id: Some(request_id),
                topic: None,
                endpoint_url: "https://example.test/hook".to_string(),
                secret: secret.map(String::from),
                headers: vec![("X-Custom".to_string(), "yes".to_string())],
                expires_at: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delivers_with_signature_and_headers() {
        let store = Arc::new(MemoryBackend::new());
        let record = terminal_record(&store).await;
        subscribe(&store, record.id, Some("s3cret")).await;

        let transport = Arc::new(RecordingTransport::default());
        let notifier = SubscriptionNotifier::new(store, transport.clone(), fast_config());
        notifier.notify_terminal(&record).await;

        let deliveries = transport.deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        let delivery = &deliveries[0];
        assert_eq!(delivery.headers.get("X-Custom").unwrap(), "yes");
        assert_eq!(
            delivery.headers.get(SIGNATURE_HEADER).unwrap(),
            &sign("s3cret", &delivery.body)
        );
        assert!(delivery.body.contains(&record.id.to_string()));
    }

    #[tokio::test]
    async fn test_no_signature_without_secret() {
        let store = Arc::new(MemoryBackend::new());
        let record = terminal_record(&store).await;
        subscribe(&store, record.id, None).await;

        let transport = Arc::new(RecordingTransport::default());
        let notifier = SubscriptionNotifier::new(store, transport.clone(), fast_config());
        notifier.notify_terminal(&record).await;

        let deliveries = transport.deliveries.lock();
        assert!(!deliveries[0].headers.contains_key(SIGNATURE_HEADER));
    }

    #[tokio::test]
    async fn test_retries_until_success_within_ceiling() {
        let store = Arc::new(MemoryBackend::new());
        let record = terminal_record(&store).await;
        let subscription = subscribe(&store, record.id, None).await;

        // Two failures, then success: within max_retries = 2.
        let transport = Arc::new(RecordingTransport::failing(2));
        let notifier = SubscriptionNotifier::new(store.clone(), transport.clone(), fast_config());
        notifier.notify_terminal(&record).await;

        assert_eq!(transport.deliveries.lock().len(), 1);
        let refreshed = store.find(subscription.id).await.unwrap().unwrap();
        assert_eq!(refreshed.failure_count, 0, "success resets nothing, counts only exhaustion");
    }

    #[tokio::test]
    async fn test_exhaustion_counts_and_disables_past_threshold() {
        let store = Arc::new(MemoryBackend::new());
        let record = terminal_record(&store).await;
        let subscription = subscribe(&store, record.id, None).await;

        let notifier = SubscriptionNotifier::new(
            store.clone(),
            Arc::new(RecordingTransport::failing(usize::MAX)),
            fast_config(),
        );

        // First exhausted event: counter at 1, still active.
        notifier.notify_terminal(&record).await;
        let after_one = store.find(subscription.id).await.unwrap().unwrap();
        assert_eq!(after_one.failure_count, 1);
        assert_eq!(after_one.status, crate::models::SubscriptionStatus::Active);

        // Second exhausted event crosses the threshold of 2.
        notifier.notify_terminal(&record).await;
        let after_two = store.find(subscription.id).await.unwrap().unwrap();
        assert_eq!(after_two.failure_count, 2);
        assert_eq!(after_two.status, crate::models::SubscriptionStatus::Error);

        // Disabled subscriptions receive nothing further.
        notifier.notify_terminal(&record).await;
        let after_three = store.find(subscription.id).await.unwrap().unwrap();
        assert_eq!(after_three.failure_count, 2);
    }

    #[tokio::test]
    async fn test_no_subscriptions_is_a_noop() {
        let store = Arc::new(MemoryBackend::new());
        let record = terminal_record(&store).await;
        let transport = Arc::new(RecordingTransport::default());
        let notifier = SubscriptionNotifier::new(store, transport.clone(), fast_config());
        notifier.notify_terminal(&record).await;
        assert!(transport.deliveries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_topic_subscription_receives_tenant_events() {
        let store = Arc::new(MemoryBackend::new());
        let record = terminal_record(&store).await;

        for topic in ["tenant-a", "tenant-b"] {
            store
                .register(NewSubscription {
                    request_id: None,
                    topic: Some(topic.to_string()),
                    endpoint_url: format!("https://example.test/{}", topic),
                    secret: None,
                    headers: vec![],
                    expires_at: None,
                })
                .await
                .unwrap();
        }

        let transport = Arc::new(RecordingTransport::default());
        let notifier = SubscriptionNotifier::new(store, transport.clone(), fast_config());
        notifier.notify_terminal(&record).await;

        // Only the subscription on the record's tenant is delivered to.
        let deliveries = transport.deliveries.lock();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].url, "https://example.test/tenant-a");
    }

    #[tokio::test]
    async fn test_first_retry_waits_the_initial_delay() {
        let store = Arc::new(MemoryBackend::new());
        let record = terminal_record(&store).await;
        subscribe(&store, record.id, None).await;

        // With a 20x multiplier, a first retry computed off the wrong
        // attempt number would wait two seconds instead of 100ms.
        let config = GatewayConfig::builder()
            .notifier_max_retries(1)
            .notifier_backoff(BackoffPolicy {
                initial_delay: Duration::from_millis(100),
                multiplier: 20.0,
                max_delay: Duration::from_secs(5),
                with_jitter: false,
            })
            .build()
            .unwrap();
        let transport = Arc::new(RecordingTransport::failing(1));
        let notifier = SubscriptionNotifier::new(store, transport.clone(), config);

        let started = std::time::Instant::now();
        notifier.notify_terminal(&record).await;
        let elapsed = started.elapsed();

        assert_eq!(transport.deliveries.lock().len(), 1);
        assert!(elapsed >= Duration::from_millis(100), "retry waited {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "retry waited {:?}", elapsed);
    }
}
