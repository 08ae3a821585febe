//! Per-key exponential failure backoff.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dungeon_core::ObjectKey;

use crate::config::RateLimitConfig;

/// Delay `base * 2^failures`, capped at `max`. Each key backs off on its own.
#[derive(Debug)]
pub struct RateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl RateLimiter {
    /// Limiter with the configured base and maximum delay.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            base: config.base_delay,
            max: config.max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<ObjectKey, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn when(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures();
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = 2u32
            .checked_pow(*count)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max));
        *count = count.saturating_add(1);
        delay
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &ObjectKey) {
        self.failures().remove(key);
    }

    /// Failures recorded for `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.failures().get(key).copied().unwrap_or(0)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}
