//! Controller: watches, the initial resync and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use dungeon_core::{ObjectKey, ResourceKind};
use dungeon_store::{StateStore, WatchFilter, WatchStream};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::events::{EventFilter, EventMapper};
use super::queue::WorkQueue;
use super::rate_limit::RateLimiter;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::naming::OWNER_LABEL;
use crate::notify::NotificationSink;
use crate::reconciler::{Action, ReconcileEngine};

/// Pause before resubscribing a closed watch.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);

/// Runs reconciliation for every monster in the store until shut down.
pub struct Controller {
    store: Arc<dyn StateStore>,
    engine: Arc<ReconcileEngine>,
    queue: Arc<WorkQueue>,
    workers: usize,
    pass_timeout: Duration,
    resync_period: Duration,
}

impl Controller {
    /// Build a controller with the default renderer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(
        store: Arc<dyn StateStore>,
        sink: Arc<dyn NotificationSink>,
        config: &ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let engine = Arc::new(ReconcileEngine::new(store.clone(), sink, config));
        Ok(Self::with_engine(store, engine, config))
    }

    /// Build a controller around an existing engine. The config is not
    /// validated here.
    pub fn with_engine(
        store: Arc<dyn StateStore>,
        engine: Arc<ReconcileEngine>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            queue: Arc::new(WorkQueue::new(RateLimiter::new(&config.rate_limit))),
            workers: config.workers.max(1),
            pass_timeout: config.pass_timeout,
            resync_period: config.resync_period,
        }
    }

    /// Handle on the work queue shared by the workers.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Enqueue every monster currently in the store.
    ///
    /// # Errors
    ///
    /// Returns the store error if the list fails.
    pub async fn resync(&self) -> Result<usize> {
        enqueue_all(self.store.as_ref(), &self.queue).await
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    ///
    /// Resolves once every in-flight pass has finished.
    ///
    /// # Errors
    ///
    /// Returns the store error if the initial resync fails.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut tasks = JoinSet::new();

        // Subscribe before listing so nothing written in between is missed.
        for (kind, filter) in subscriptions() {
            let stream = self.store.watch(kind, filter.clone());
            tasks.spawn(pump_events(
                Subscription {
                    kind,
                    filter,
                    store: Arc::clone(&self.store),
                },
                stream,
                self.queue(),
                shutdown.clone(),
            ));
        }

        let queued = self.resync().await?;
        info!(count = queued, "Initial resync queued monsters");

        if !self.resync_period.is_zero() {
            tasks.spawn(resync_periodically(
                Arc::clone(&self.store),
                self.queue(),
                self.resync_period,
                shutdown.clone(),
            ));
        }

        for worker in 0..self.workers {
            tasks.spawn(run_worker(
                worker,
                Arc::clone(&self.engine),
                self.queue(),
                self.pass_timeout,
            ));
        }
        info!(workers = self.workers, "Controller started");

        wait_for_shutdown(shutdown).await;
        info!(in_flight = self.queue.in_flight(), "Shutting down, draining workers");
        self.queue.shut_down();

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Controller task ended abnormally");
            }
        }
        info!("Controller stopped");
        Ok(())
    }
}

/// What a pump watches, and where to resubscribe from.
struct Subscription {
    kind: ResourceKind,
    filter: WatchFilter,
    store: Arc<dyn StateStore>,
}

fn subscriptions() -> Vec<(ResourceKind, WatchFilter)> {
    std::iter::once((ResourceKind::Monster, WatchFilter::All))
        .chain(
            ResourceKind::DEPENDENTS
                .into_iter()
                .map(|kind| (kind, WatchFilter::HasLabel(OWNER_LABEL.to_string()))),
        )
        .collect()
}

async fn enqueue_all(store: &dyn StateStore, queue: &WorkQueue) -> Result<usize> {
    let monsters = store.list(ResourceKind::Monster).await?;
    let count = monsters.len();
    for monster in monsters {
        queue.add(monster.key());
    }
    Ok(count)
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

async fn pump_events(
    subscription: Subscription,
    mut stream: WatchStream,
    queue: Arc<WorkQueue>,
    shutdown: watch::Receiver<bool>,
) {
    let kind = subscription.kind;
    let mut filter = EventFilter::new();
    let mapper = EventMapper;
    let stop = wait_for_shutdown(shutdown);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => break,
            event = stream.next() => {
                let Some(event) = event else {
                    // Events may have been lost: resubscribe, then relist so
                    // every monster gets a pass against current state.
                    warn!(%kind, "Watch stream closed, resubscribing");
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    stream = subscription
                        .store
                        .watch(kind, subscription.filter.clone());
                    filter = EventFilter::new();
                    match enqueue_all(subscription.store.as_ref(), &queue).await {
                        Ok(count) => info!(%kind, count, "Relisted monsters after watch loss"),
                        Err(e) => warn!(%kind, error = %e, "Relist after watch loss failed"),
                    }
                    continue;
                };
                if !filter.admit(&event) {
                    continue;
                }
                if let Some(key) = mapper.map(&event) {
                    debug!(%kind, event = ?event.event_type, monster = %key, "Queueing monster");
                    queue.add(key);
                }
            }
        }
    }
    debug!(%kind, "Event pump stopped");
}

async fn resync_periodically(
    store: Arc<dyn StateStore>,
    queue: Arc<WorkQueue>,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes at once; startup has just listed.
    ticker.tick().await;
    let stop = wait_for_shutdown(shutdown);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => break,
            _ = ticker.tick() => match enqueue_all(store.as_ref(), &queue).await {
                Ok(count) => debug!(count, "Periodic resync queued monsters"),
                Err(e) => warn!(error = %e, "Periodic resync failed"),
            },
        }
    }
    debug!("Periodic resync stopped");
}

async fn run_worker(
    worker: usize,
    engine: Arc<ReconcileEngine>,
    queue: Arc<WorkQueue>,
    pass_timeout: Duration,
) {
    while let Some(key) = queue.get().await {
        let outcome = run_pass(&engine, &key, pass_timeout).await;
        route(&queue, &key, outcome);
        queue.done(&key);
    }
    debug!(worker, "Worker stopped");
}

/// One pass under the deadline. Overrunning drops the pass mid-flight.
async fn run_pass(
    engine: &ReconcileEngine,
    key: &ObjectKey,
    pass_timeout: Duration,
) -> Result<Action> {
    tokio::time::timeout(pass_timeout, engine.reconcile(key))
        .await
        .unwrap_or_else(|_| {
            Err(Error::Timeout {
                key: key.clone(),
                timeout_ms: u64::try_from(pass_timeout.as_millis()).unwrap_or(u64::MAX),
            })
        })
}

fn route(queue: &Arc<WorkQueue>, key: &ObjectKey, outcome: Result<Action>) {
    match outcome {
        Ok(action) if action.requeue => {
            queue.forget(key);
            queue.add(key.clone());
        }
        Ok(_) => queue.forget(key),
        Err(e) if e.class().is_retryable() => {
            warn!(
                monster = %key,
                error = %e,
                class = ?e.class(),
                failures = queue.num_requeues(key),
                "Reconciliation failed, retrying with backoff"
            );
            queue.add_rate_limited(key.clone());
        }
        Err(e) => {
            error!(monster = %key, error = %e, "Reconciliation failed permanently");
            queue.forget(key);
        }
    }
}
