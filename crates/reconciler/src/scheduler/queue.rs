//! Deduplicating work queue of monster keys.
//!
//! A key is in at most one of two places: waiting in the queue, or being
//! processed by a worker. Adding a key that is already waiting is a no-op.
//! Adding a key that is being processed marks it dirty, and `done` puts it
//! back in the queue, so no two workers ever reconcile the same key at once
//! and no change observed mid-pass is lost.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dungeon_core::ObjectKey;
use tokio::sync::Notify;
use tracing::trace;

use super::rate_limit::RateLimiter;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    /// Keys that need a pass: everything in `queue` plus processing keys
    /// re-added since their pass started.
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

/// Deduplicating queue of monster keys.
///
/// A key is handed to at most one worker at a time. Adding a key that is
/// being processed marks it dirty so it is queued again once released.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Notify,
    limiter: RateLimiter,
}

impl WorkQueue {
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            limiter,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `key` unless it is already waiting.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            trace!(monster = %key, "Key busy, marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.ready.notify_one();
    }

    /// Enqueue `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Enqueue `key` after its rate-limited backoff.
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) {
        let delay = self.limiter.when(&key);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        trace!(monster = %key, delay_ms, "Requeue after backoff");
        self.add_after(key, delay);
    }

    /// Reset the backoff of `key`.
    pub fn forget(&self, key: &ObjectKey) {
        self.limiter.forget(key);
    }

    /// Consecutive rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The key is marked as processing until [`WorkQueue::done`] is called.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking state so a concurrent add or shutdown
            // cannot slip between the check and the wait.
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`, requeueing it if it was re-added meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently held by workers.
    pub fn in_flight(&self) -> usize {
        self.state().processing.len()
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.ready.notify_waiters();
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(RateLimiter::default())
    }
}
