//! Reconcile engine: one pass over one monster.
//!
//! A pass reads the monster, decides what its current state calls for and
//! performs at most one phase transition:
//!
//! | State                          | Pass                                           |
//! |--------------------------------|------------------------------------------------|
//! | gone                           | nothing                                        |
//! | deleting, token held           | teardown                                       |
//! | deleting, token released       | nothing                                        |
//! | phase unset                    | add token, move to Initializing, requeue       |
//! | Initializing                   | apply dependents, move to Active               |
//! | Active, workload missing       | drift cascade                                  |
//! | Active                         | apply dependents where their digest changed    |
//!
//! Nothing is carried between passes: every decision is made from what the
//! store holds when the pass starts.

use std::sync::Arc;

use dungeon_core::{Monster, ObjectKey, Phase, ResourceKind};
use dungeon_store::{OptionalExt, StateStore};
use tracing::{debug, info};

use crate::apply::{ApplyOutcome, Applier};
use crate::config::ControllerConfig;
use crate::drift::{Drift, DriftDetector};
use crate::error::Result;
use crate::finalizer::FinalizerProtocol;
use crate::naming::{ChildNames, NamingConfig};
use crate::notify::NotificationSink;
use crate::render::{Renderer, TemplateRenderer};
use crate::retry::RetryPolicy;

/// What the scheduler should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Action {
    pub requeue: bool,
}

impl Action {
    /// The pass converged; wait for the next event.
    #[must_use]
    pub const fn done() -> Self {
        Self { requeue: false }
    }

    /// Run another pass right away, without backoff.
    #[must_use]
    pub const fn requeue() -> Self {
        Self { requeue: true }
    }
}

/// Result of a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Written,
    Unchanged,
    /// The monster started deleting; the write was skipped.
    Deleting,
    Gone,
}

/// Drives monsters toward their desired state.
pub struct ReconcileEngine {
    store: Arc<dyn StateStore>,
    renderer: Arc<dyn Renderer>,
    applier: Applier,
    finalizer: Arc<FinalizerProtocol>,
    drift: DriftDetector,
    naming: NamingConfig,
    retry: RetryPolicy,
}

impl ReconcileEngine {
    /// Engine with the default renderer, configured from `config`.
    pub fn new(
        store: Arc<dyn StateStore>,
        sink: Arc<dyn NotificationSink>,
        config: &ControllerConfig,
    ) -> Self {
        let renderer = Arc::new(TemplateRenderer::new(
            config.workload.clone(),
            config.ingress.clone(),
        ));
        Self::with_renderer(store, sink, renderer, config)
    }

    /// Build an engine that renders dependents with `renderer` in place of
    /// the template renderer.
    pub fn with_renderer(
        store: Arc<dyn StateStore>,
        sink: Arc<dyn NotificationSink>,
        renderer: Arc<dyn Renderer>,
        config: &ControllerConfig,
    ) -> Self {
        let retry = config.conflict_retry.clone();
        let finalizer = Arc::new(FinalizerProtocol::new(
            store.clone(),
            sink,
            config.notification.policy,
            config.finalizer.clone(),
            retry.clone(),
        ));
        Self {
            applier: Applier::new(store.clone(), retry.clone()),
            drift: DriftDetector::new(store.clone(), finalizer.clone()),
            store,
            renderer,
            finalizer,
            naming: config.naming.clone(),
            retry,
        }
    }

    /// Dependent names for the monster at `key` under the configured naming.
    pub fn names_for(&self, key: &ObjectKey) -> ChildNames {
        ChildNames::for_entity(key, &self.naming)
    }

    /// Run one pass for `key`.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the pass; its class decides whether the
    /// scheduler retries.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(object) = self.store.get(ResourceKind::Monster, key).await.optional()? else {
            debug!(monster = %key, "Monster gone, nothing to do");
            return Ok(Action::done());
        };
        let monster = Monster::from_object(object)?;
        let names = self.names_for(key);

        if monster.meta.is_deleting() {
            return self.finalize(&monster, &names).await;
        }

        match monster.phase() {
            Phase::Unset => self.initialize(key).await,
            Phase::Initializing => self.activate(&monster, &names).await,
            Phase::Active => self.maintain(&monster, &names).await,
        }
    }

    async fn finalize(&self, monster: &Monster, names: &ChildNames) -> Result<Action> {
        if monster.meta.finalizers.contains(self.finalizer.token()) {
            self.finalizer.teardown(monster, names).await?;
        } else {
            debug!(monster = %names.owner, "Deleting without our finalizer, nothing to do");
        }
        Ok(Action::done())
    }

    async fn initialize(&self, key: &ObjectKey) -> Result<Action> {
        match self.transition(key, Phase::Initializing).await? {
            Transition::Written | Transition::Unchanged => Ok(Action::requeue()),
            Transition::Deleting | Transition::Gone => Ok(Action::done()),
        }
    }

    async fn activate(&self, monster: &Monster, names: &ChildNames) -> Result<Action> {
        self.apply_dependents(monster, names).await?;
        self.transition(&names.owner, Phase::Active).await?;
        Ok(Action::done())
    }

    async fn maintain(&self, monster: &Monster, names: &ChildNames) -> Result<Action> {
        if self.drift.check(monster, names).await? == Drift::WorkloadMissing {
            self.drift.cascade(monster, names).await?;
            return Ok(Action::done());
        }

        // Token lost out-of-band: restore it before touching dependents.
        if !monster.meta.finalizers.contains(self.finalizer.token()) {
            self.transition(&names.owner, Phase::Active).await?;
            return Ok(Action::requeue());
        }

        self.apply_dependents(monster, names).await?;
        Ok(Action::done())
    }

    /// Apply every rendered dependent, in the renderer's order.
    async fn apply_dependents(&self, monster: &Monster, names: &ChildNames) -> Result<usize> {
        let mut written = 0;
        for desired in self.renderer.render(monster, names)? {
            if self.applier.apply(&desired).await? != ApplyOutcome::Unchanged {
                written += 1;
            }
        }
        if written == 0 {
            debug!(monster = %names.owner, "Dependents up to date");
        }
        Ok(written)
    }

    /// Hold the token and record `target` on a fresh copy of the monster.
    async fn transition(&self, key: &ObjectKey, target: Phase) -> Result<Transition> {
        let mut backoff = self.retry.backoff();
        loop {
            match self.try_transition(key, target).await {
                Err(e) if e.is_store_conflict() => {
                    backoff.wait("status update", ResourceKind::Monster, key).await?;
                }
                other => return other,
            }
        }
    }

    async fn try_transition(&self, key: &ObjectKey, target: Phase) -> Result<Transition> {
        let Some(object) = self.store.get(ResourceKind::Monster, key).await.optional()? else {
            return Ok(Transition::Gone);
        };
        let mut monster = Monster::from_object(object)?;
        if monster.meta.is_deleting() {
            return Ok(Transition::Deleting);
        }

        let from = monster.phase();
        let added = monster.meta.finalizers.insert(self.finalizer.token());
        if !added && from == target {
            return Ok(Transition::Unchanged);
        }
        monster.status.phase = target;

        match self.store.update(monster.to_object()?).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(Transition::Gone),
            Err(e) => return Err(e.into()),
        }
        if added {
            info!(monster = %key, token = %self.finalizer.token(), "Finalizer added");
        }
        if from != target {
            info!(monster = %key, %from, to = %target, "Phase transition");
        }
        Ok(Transition::Written)
    }
}
