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

//! Configuration for the gateway engine.
//!
//! # Construction
//!
//! Use [`GatewayConfig::builder()`] to create a configuration:
//!
//! ```rust
//! use std::time::Duration;
//! use aqueduct::config::GatewayConfig;
//!
//! let config = GatewayConfig::builder()
//!     .sync_deadline(Duration::from_secs(25))
//!     .max_concurrent_attempts(8)
//!     .build()
//!     .unwrap();
//! ```
//!
//! Or use the default configuration:
//!
//! ```rust
//! use aqueduct::config::GatewayConfig;
//! let config = GatewayConfig::default();
//! ```

use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::BackoffPolicy;

/// Configuration for the gateway engine.
///
/// Controls the synchronous deadline, attempt pool size, downstream step
/// timeouts, outbox publisher cadence, and webhook delivery behavior.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct GatewayConfig {
    sync_deadline: Duration,
    max_concurrent_attempts: usize,
    step_timeout: Duration,
    pipeline_queue: String,
    payload_bucket: String,
    publisher_poll_interval: Duration,
    publisher_batch_size: usize,
    notifier_timeout: Duration,
    notifier_max_retries: u32,
    notifier_backoff: BackoffPolicy,
    subscription_failure_threshold: i32,
    idempotency_ttl: Duration,
    db_pool_size: u32,
}

impl GatewayConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Hard wall-clock deadline for the synchronous resolution attempt.
    ///
    /// Set this a few seconds under the caller's contractual SLA to leave
    /// margin for response serialization.
    pub fn sync_deadline(&self) -> Duration {
        self.sync_deadline
    }

    /// Size of the bounded attempt pool. When the pool is exhausted, new
    /// submissions skip the synchronous attempt and hand off directly.
    pub fn max_concurrent_attempts(&self) -> usize {
        self.max_concurrent_attempts
    }

    /// Per-call timeout for downstream transformation/validation steps.
    /// Always shorter than the synchronous deadline.
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Destination queue name for pipeline stage messages.
    pub fn pipeline_queue(&self) -> &str {
        &self.pipeline_queue
    }

    /// Blob store bucket for request artifacts.
    pub fn payload_bucket(&self) -> &str {
        &self.payload_bucket
    }

    /// How often the outbox publisher polls for unpublished entries.
    pub fn publisher_poll_interval(&self) -> Duration {
        self.publisher_poll_interval
    }

    /// Maximum outbox entries claimed per publisher cycle.
    pub fn publisher_batch_size(&self) -> usize {
        self.publisher_batch_size
    }

    /// HTTP timeout for a single webhook delivery attempt.
    pub fn notifier_timeout(&self) -> Duration {
        self.notifier_timeout
    }

    /// Retry ceiling per triggering event for webhook delivery.
    pub fn notifier_max_retries(&self) -> u32 {
        self.notifier_max_retries
    }

    /// Back-off policy between webhook delivery attempts.
    pub fn notifier_backoff(&self) -> &BackoffPolicy {
        &self.notifier_backoff
    }

    /// Failure-count threshold past which a subscription is durably
    /// disabled.
    pub fn subscription_failure_threshold(&self) -> i32 {
        self.subscription_failure_threshold
    }

    /// Lifetime of an idempotency reservation. A key seen again after
    /// expiry is treated as new.
    pub fn idempotency_ttl(&self) -> Duration {
        self.idempotency_ttl
    }

    /// Number of database connections in the pool.
    pub fn db_pool_size(&self) -> u32 {
        self.db_pool_size
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sync_deadline: Duration::from_secs(25),
            max_concurrent_attempts: 16,
            step_timeout: Duration::from_secs(5),
            pipeline_queue: "aqueduct.pipeline".to_string(),
            payload_bucket: "aqueduct-artifacts".to_string(),
            publisher_poll_interval: Duration::from_secs(1),
            publisher_batch_size: 50,
            notifier_timeout: Duration::from_secs(10),
            notifier_max_retries: 3,
            notifier_backoff: BackoffPolicy::default(),
            subscription_failure_threshold: 5,
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            db_pool_size: 10,
        }
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl Default for GatewayConfigBuilder {
    fn default() -> Self {
        Self {
            config: GatewayConfig::default(),
        }
    }
}

impl GatewayConfigBuilder {
    pub fn sync_deadline(mut self, value: Duration) -> Self {
        self.config.sync_deadline = value;
        self
    }

    pub fn max_concurrent_attempts(mut self, value: usize) -> Self {
        self.config.max_concurrent_attempts = value;
        self
    }

    pub fn step_timeout(mut self, value: Duration) -> Self {
        self.config.step_timeout = value;
        self
    }

    pub fn pipeline_queue(mut self, value: impl Into<String>) -> Self {
        self.config.pipeline_queue = value.into();
        self
    }

    pub fn payload_bucket(mut self, value: impl Into<String>) -> Self {
        self.config.payload_bucket = value.into();
        self
    }

    pub fn publisher_poll_interval(mut self, value: Duration) -> Self {
        self.config.publisher_poll_interval = value;
        self
    }

    pub fn publisher_batch_size(mut self, value: usize) -> Self {
        self.config.publisher_batch_size = value;
        self
    }

    pub fn notifier_timeout(mut self, value: Duration) -> Self {
        self.config.notifier_timeout = value;
        self
    }

    pub fn notifier_max_retries(mut self, value: u32) -> Self {
        self.config.notifier_max_retries = value;
        self
    }

    pub fn notifier_backoff(mut self, value: BackoffPolicy) -> Self {
        self.config.notifier_backoff = value;
        self
    }

    pub fn subscription_failure_threshold(mut self, value: i32) -> Self {
        self.config.subscription_failure_threshold = value;
        self
    }

    pub fn idempotency_ttl(mut self, value: Duration) -> Self {
        self.config.idempotency_ttl = value;
        self
    }

    pub fn db_pool_size(mut self, value: u32) -> Self {
        self.config.db_pool_size = value;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<GatewayConfig, ConfigError> {
        let config = self.config;

        if config.sync_deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sync_deadline",
                reason: "must be non-zero".to_string(),
            });
        }
        if config.step_timeout >= config.sync_deadline {
            return Err(ConfigError::InvalidValue {
                field: "step_timeout",
                reason: format!(
                    "must be shorter than sync_deadline ({:?})",
                    config.sync_deadline
                ),
            });
        }
        if config.max_concurrent_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if config.publisher_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "publisher_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if config.subscription_failure_threshold < 1 {
            return Err(ConfigError::InvalidValue {
                field: "subscription_failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if config.idempotency_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "idempotency_ttl",
                reason: "must be non-zero".to_string(),
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds() {
        let config = GatewayConfig::builder().build().unwrap();
        assert_eq!(config.max_concurrent_attempts(), 16);
        assert!(config.step_timeout() < config.sync_deadline());
    }

    #[test]
    fn test_step_timeout_must_fit_inside_deadline() {
        let result = GatewayConfig::builder()
            .sync_deadline(Duration::from_secs(2))
            .step_timeout(Duration::from_secs(5))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_attempt_pool_rejected() {
        let result = GatewayConfig::builder().max_concurrent_attempts(0).build();
        assert!(result.is_err());
    }
}
