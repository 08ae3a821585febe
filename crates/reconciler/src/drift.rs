//! Detection of a vanished workload, which takes the whole monster with it.
//!
//! The workload is the load-bearing dependent: once a monster is Active, its
//! workload disappearing out-of-band means the monster itself is gone. The
//! cascade reuses the finalizer steps so the portal hears about it exactly
//! once per pass, and releases the token in the same pass so the store can
//! drop the record.

use std::sync::Arc;

use dungeon_core::{Monster, Phase, ResourceKind};
use dungeon_store::{OptionalExt, StateStore};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::finalizer::{FinalizerProtocol, Release};
use crate::naming::ChildNames;

/// Outcome of a drift check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    InSync,
    /// The monster was Active and its workload is gone. Teardown has started.
    WorkloadMissing,
}

/// Detects an Active monster whose workload has disappeared and starts its
/// teardown.
pub struct DriftDetector {
    store: Arc<dyn StateStore>,
    finalizer: Arc<FinalizerProtocol>,
}

impl DriftDetector {
    pub fn new(store: Arc<dyn StateStore>, finalizer: Arc<FinalizerProtocol>) -> Self {
        Self { store, finalizer }
    }

    /// Check an Active monster for a missing workload.
    ///
    /// Monsters in any other phase are always in sync: their workload may not
    /// have been created yet.
    ///
    /// # Errors
    ///
    /// Propagates store errors other than `NotFound`.
    pub async fn check(&self, monster: &Monster, names: &ChildNames) -> Result<Drift> {
        if monster.phase() != Phase::Active {
            return Ok(Drift::InSync);
        }
        let workload = self
            .store
            .get(ResourceKind::Deployment, &names.workload)
            .await
            .optional()?;
        if workload.is_some() {
            Ok(Drift::InSync)
        } else {
            warn!(monster = %names.owner, workload = %names.workload, "Workload missing");
            Ok(Drift::WorkloadMissing)
        }
    }

    /// Delete the monster and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error; rerunning the cascade is safe.
    pub async fn cascade(&self, monster: &Monster, names: &ChildNames) -> Result<Release> {
        let key = monster.key();
        info!(monster = %key, "Workload vanished, deleting monster");

        self.finalizer.notify(monster).await?;
        let drained = self.finalizer.drain_dependents(names).await?;
        debug!(monster = %key, drained, "Remaining dependents removed");

        match self.store.delete(ResourceKind::Monster, &key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(Release::Gone),
            Err(e) => return Err(e.into()),
        }

        // Must release in this pass: the marker alone would re-run teardown.
        self.finalizer.release(&key).await
    }
}
