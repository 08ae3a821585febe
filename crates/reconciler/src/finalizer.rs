//! Teardown of a monster's dependents before the store may drop the monster.
//!
//! Steps run in a fixed order and each is idempotent, so a pass that fails
//! partway is simply run again:
//!
//! 1. send the deletion notice
//! 2. delete the dependents, workload first and configuration last
//! 3. release the finalizer token with a fresh version
//!
//! Teardown is at-least-once: a failure after step 1 re-sends the notice on
//! the next pass.

use std::sync::Arc;

use dungeon_core::{Monster, ObjectKey, ResourceKind};
use dungeon_store::{OptionalExt, StateStore};
use tracing::{info, warn};

use crate::apply::Applier;
use crate::error::Result;
use crate::naming::ChildNames;
use crate::notify::{DeletionNotice, NotificationPolicy, NotificationSink};
use crate::retry::RetryPolicy;

/// Result of releasing the finalizer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Token removed by this call.
    Released,
    /// Token was not present.
    NotHeld,
    /// The monster no longer exists.
    Gone,
}

/// Finalizer handling for one controller token.
pub struct FinalizerProtocol {
    store: Arc<dyn StateStore>,
    applier: Applier,
    sink: Arc<dyn NotificationSink>,
    policy: NotificationPolicy,
    token: String,
    retry: RetryPolicy,
}

impl FinalizerProtocol {
    /// Protocol guarding monsters with `token`.
    ///
    /// `policy` decides whether a failed deletion notice holds the finalizer.
    pub fn new(
        store: Arc<dyn StateStore>,
        sink: Arc<dyn NotificationSink>,
        policy: NotificationPolicy,
        token: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            applier: Applier::new(store.clone(), retry.clone()),
            store,
            sink,
            policy,
            token: token.into(),
            retry,
        }
    }

    /// The finalizer token this protocol adds and removes.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Run every teardown step for a monster marked for deletion.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error; earlier steps are not undone.
    pub async fn teardown(&self, monster: &Monster, names: &ChildNames) -> Result<Release> {
        let key = monster.key();
        info!(monster = %key, "Tearing down dependents");
        self.notify(monster).await?;
        self.drain_dependents(names).await?;
        let release = self.release(&key).await?;
        info!(monster = %key, ?release, "Teardown complete");
        Ok(release)
    }

    /// Send the deletion notice, subject to the notification policy.
    ///
    /// # Errors
    ///
    /// Returns `Notification` under [`NotificationPolicy::Required`].
    pub async fn notify(&self, monster: &Monster) -> Result<()> {
        let notice = DeletionNotice::for_monster(monster);
        match (self.sink.notify_deletion(&notice).await, self.policy) {
            (Ok(()), _) => {
                info!(monster = %notice.key(), id = notice.monster_id, "Deletion notice sent");
                Ok(())
            }
            (Err(e), NotificationPolicy::BestEffort) => {
                warn!(monster = %notice.key(), error = %e, "Deletion notice failed, continuing");
                Ok(())
            }
            (Err(e), NotificationPolicy::Required) => Err(e),
        }
    }

    /// Delete every dependent in teardown order. Missing ones count as done.
    ///
    /// Returns how many dependents were actually deleted.
    ///
    /// # Errors
    ///
    /// Returns the first store error other than `NotFound`.
    pub async fn drain_dependents(&self, names: &ChildNames) -> Result<usize> {
        let mut deleted = 0;
        for (kind, key) in names.teardown_order() {
            if self.applier.delete_if_present(kind, key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Remove the token from a freshly fetched copy of the monster.
    ///
    /// # Errors
    ///
    /// Returns `ConflictRetryExhausted` if the write keeps conflicting.
    pub async fn release(&self, key: &ObjectKey) -> Result<Release> {
        let mut backoff = self.retry.backoff();
        loop {
            match self.try_release(key).await {
                Err(e) if e.is_store_conflict() => {
                    backoff.wait("finalizer release", ResourceKind::Monster, key).await?;
                }
                other => return other,
            }
        }
    }

    async fn try_release(&self, key: &ObjectKey) -> Result<Release> {
        let Some(mut current) = self.store.get(ResourceKind::Monster, key).await.optional()? else {
            return Ok(Release::Gone);
        };
        if !current.meta.finalizers.remove(&self.token) {
            return Ok(Release::NotHeld);
        }
        match self.store.update(current).await {
            Ok(_) => {
                info!(monster = %key, token = %self.token, "Finalizer released");
                Ok(Release::Released)
            }
            // Dropped between our read and write: nothing left to release.
            Err(e) if e.is_not_found() => Ok(Release::Gone),
            Err(e) => Err(e.into()),
        }
    }
}
