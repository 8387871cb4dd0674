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

//! Exponential back-off policy for delivery retries.
//!
//! Used by the subscription notifier between webhook attempts. Delays grow
//! by a fixed multiplier from an initial value up to a cap, with optional
//! jitter to avoid thundering-herd retries against a recovering endpoint.

use rand::Rng;
use std::time::Duration;

/// Back-off configuration for retryable deliveries.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Whether to apply +/-25% jitter to each delay.
    pub with_jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            with_jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay before retry number `attempt` (0-based: attempt 0
    /// is the delay after the first failure).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let millis = if self.with_jitter {
            let spread = capped * 0.25;
            let jitter = rand::thread_rng().gen_range(-spread..=spread);
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
            with_jitter: false,
        }
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = BackoffPolicy {
            with_jitter: true,
            ..no_jitter()
        };
        for attempt in 0..5 {
            let base = no_jitter().delay_for_attempt(attempt).as_millis() as f64;
            let jittered = policy.delay_for_attempt(attempt).as_millis() as f64;
            assert!(jittered >= base * 0.74, "attempt {}: {} too low", attempt, jittered);
            assert!(jittered <= base * 1.26, "attempt {}: {} too high", attempt, jittered);
        }
    }
}
