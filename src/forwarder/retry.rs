// SPDX-License-Identifier: Apache-2.0

use super::config::RetryConfig;
use std::time::Duration;

/// Exponential backoff with jitter. Never gives up; the forwarder retries a
/// retryable batch until it is acknowledged or the process shuts down.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current: config.initial_backoff,
            config,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt; doubles the base delay up to `max_backoff`.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;

        let backoff_ms = self.current.as_millis() as i64;
        let mut v = backoff_ms / 2;
        // avoid div by zero
        if v == 0 {
            v = 1;
        }

        let jitter = (rand::random::<i64>() % v) - (v / 2);
        let mut sleep_ms = backoff_ms + jitter;
        if sleep_ms < 1 {
            sleep_ms = 1;
        }

        self.current = std::cmp::min(self.current * 2, self.config.max_backoff);
        Duration::from_millis(sleep_ms as u64)
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial_backoff;
        self.attempts = 0;
    }
}
