//! In-memory store with real optimistic-concurrency semantics.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dungeon_core::{ObjectKey, ResourceKind, ResourceVersion, StoredObject};
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::StateStore;
use crate::watch::{EventType, WatchEvent, WatchFilter, WatchStream};

const WATCH_CAPACITY: usize = 1024;

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// Counters of successful writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl WriteStats {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.creates
            .saturating_add(self.updates)
            .saturating_add(self.deletes)
    }
}

#[derive(Default)]
struct Counters {
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WriteStats {
        WriteStats {
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

type Slot = (ResourceKind, ObjectKey);

/// In-memory object store.
///
/// Versions come from a single store-wide revision counter, so every write
/// yields a version never seen before. Watch events are published while the
/// write lock is held, which keeps their order identical to the write order.
pub struct InMemoryStore {
    objects: RwLock<HashMap<Slot, StoredObject>>,
    revision: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    counters: Counters,
    failures: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::with_watch_capacity(WATCH_CAPACITY)
    }

    /// Create a store whose watchers may fall at most `capacity` events
    /// behind before their stream ends.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            objects: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            events,
            counters: Counters::default(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of successful write counts.
    pub fn stats(&self) -> WriteStats {
        self.counters.snapshot()
    }

    /// Make the next call of `op` fail with `error`. Calls queue up in order.
    pub async fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.failures
            .lock()
            .await
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Number of objects currently held, including those being deleted.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    async fn injected(&self, op: StoreOp) -> StoreResult<()> {
        let mut failures = self.failures.lock().await;
        match failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => {
                debug!(?op, %error, "Returning injected failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn next_version(&self) -> ResourceVersion {
        let previous = self.revision.fetch_add(1, Ordering::SeqCst);
        ResourceVersion::new(previous.saturating_add(1))
    }

    fn publish(&self, event_type: EventType, object: &StoredObject) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(WatchEvent::from_object(event_type, object));
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<StoredObject> {
        self.injected(StoreOp::Get).await?;
        self.objects
            .read()
            .await
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, key))
    }

    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<StoredObject>> {
        self.injected(StoreOp::List).await?;
        let objects = self.objects.read().await;
        let mut listed: Vec<StoredObject> = objects
            .values()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(listed)
    }

    async fn create(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        self.injected(StoreOp::Create).await?;
        let slot = (object.kind, object.key());
        let mut objects = self.objects.write().await;
        if objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists {
                kind: slot.0,
                key: slot.1,
            });
        }
        object.meta.resource_version = self.next_version();
        object.meta.deletion_timestamp = None;
        objects.insert(slot, object.clone());
        Counters::bump(&self.counters.creates);
        self.publish(EventType::Added, &object);
        Ok(object)
    }

    async fn update(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        self.injected(StoreOp::Update).await?;
        let slot = (object.kind, object.key());
        let mut objects = self.objects.write().await;
        let current = objects
            .get(&slot)
            .ok_or_else(|| StoreError::not_found(slot.0, &slot.1))?;

        if current.meta.resource_version != object.meta.resource_version {
            return Err(StoreError::Conflict {
                kind: slot.0,
                key: slot.1,
                expected: object.meta.resource_version,
                actual: current.meta.resource_version,
            });
        }

        if current.meta.is_deleting() {
            let added = object
                .meta
                .finalizers
                .iter()
                .any(|t| !current.meta.finalizers.contains(t));
            if added {
                return Err(StoreError::invalid(
                    slot.0,
                    &slot.1,
                    "finalizers cannot be added to an object being deleted",
                ));
            }
        }
        object.meta.deletion_timestamp = current.meta.deletion_timestamp;
        object.meta.resource_version = self.next_version();
        Counters::bump(&self.counters.updates);

        if object.meta.is_deleting() && object.meta.finalizers.is_empty() {
            objects.remove(&slot);
            debug!(kind = %slot.0, key = %slot.1, "Finalizers cleared, object removed");
            self.publish(EventType::Deleted, &object);
        } else {
            objects.insert(slot, object.clone());
            self.publish(EventType::Modified, &object);
        }
        Ok(object)
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<()> {
        self.injected(StoreOp::Delete).await?;
        let slot = (kind, key.clone());
        let mut objects = self.objects.write().await;
        let finalized = match objects.get(&slot) {
            None => return Err(StoreError::not_found(kind, key)),
            Some(current) if current.meta.is_deleting() => return Ok(()),
            Some(current) => current.meta.finalizers.is_empty(),
        };

        if finalized {
            if let Some(removed) = objects.remove(&slot) {
                Counters::bump(&self.counters.deletes);
                self.publish(EventType::Deleted, &removed);
            }
            return Ok(());
        }

        if let Some(current) = objects.get_mut(&slot) {
            current.meta.deletion_timestamp = Some(Utc::now());
            current.meta.resource_version = self.next_version();
            Counters::bump(&self.counters.deletes);
            self.publish(EventType::Modified, current);
        }
        Ok(())
    }

    fn watch(&self, kind: ResourceKind, filter: WatchFilter) -> WatchStream {
        // A lagged receiver has lost events for good: end the stream so the
        // subscriber relists instead of carrying on with a gap.
        let stream = BroadcastStream::new(self.events.subscribe())
            .take_while(move |item| {
                if let Err(e) = item {
                    warn!(%kind, error = %e, "Watch lagged, closing stream");
                }
                futures::future::ready(item.is_ok())
            })
            .filter_map(move |item| {
                let event = item
                    .ok()
                    .filter(|event| event.kind == kind && filter.matches(&event.labels));
                futures::future::ready(event)
            });
        Box::pin(stream)
    }
}
