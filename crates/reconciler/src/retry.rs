//! Bounded exponential backoff for optimistic-concurrency conflicts.
//!
//! Every fetch-modify-write in the reconciler is written as an explicit loop:
//!
//! ```ignore
//! let mut backoff = policy.backoff();
//! loop {
//!     match try_write().await {
//!         Err(e) if e.is_store_conflict() => backoff.wait("apply", kind, &key).await?,
//!         other => return other,
//!     }
//! }
//! ```
//!
//! The cursor owns the attempt count, so exhaustion surfaces as a
//! `ConflictRetryExhausted` error instead of an unbounded loop.

use std::time::Duration;

use dungeon_core::{ObjectKey, ResourceKind};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::duration_ms;
use crate::error::{Error, Result};

/// Configuration for conflict retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay after the first conflict.
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts.
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Policy that never sleeps. Used by tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Start a fresh cursor for one fetch-modify-write.
    #[must_use]
    pub const fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempt: 1,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` >= 1 failed.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as f64);

        let final_ms = if self.jitter {
            capped_ms * (1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            capped_ms
        };

        if final_ms.is_finite() && final_ms > 0.0 {
            Duration::from_millis(final_ms.round() as u64)
        } else {
            Duration::ZERO
        }
    }
}

/// Attempt cursor over a [`RetryPolicy`].
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
}

impl Backoff<'_> {
    /// The attempt currently in flight, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Sleep before the next attempt after a conflict.
    ///
    /// # Errors
    ///
    /// Returns `ConflictRetryExhausted` once the policy's attempts are used up.
    pub async fn wait(
        &mut self,
        operation: &'static str,
        kind: ResourceKind,
        key: &ObjectKey,
    ) -> Result<()> {
        let failed = self.attempt;
        let Some(delay) = self.next_delay() else {
            return Err(Error::ConflictRetryExhausted {
                operation,
                kind,
                key: key.clone(),
                attempts: failed,
            });
        };
        warn!(
            %kind,
            %key,
            operation,
            attempt = failed,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Version conflict, refetching"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
