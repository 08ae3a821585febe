//! Shared fixtures for the reconciler integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dungeon_core::{Monster, MonsterSpec, ObjectKey, ResourceKind, StoredObject};
use dungeon_reconciler::{
    ControllerConfig, DeletionNotice, Error, NotificationSink, ReconcileEngine, RetryPolicy,
};
use dungeon_store::{InMemoryStore, OptionalExt, StateStore, StoreResult, WatchFilter, WatchStream};

/// A store call as seen by [`ObservedStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ResourceKind, ObjectKey),
    Update(ResourceKind, ObjectKey),
    Delete(ResourceKind, ObjectKey),
}

/// Store wrapper that records writes and can race the controller's own
/// monster updates with an interfering write from "another actor".
pub struct ObservedStore {
    inner: Arc<InMemoryStore>,
    calls: Mutex<Vec<Call>>,
    races: AtomicU32,
}

impl ObservedStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            races: AtomicU32::new(0),
        }
    }

    /// Race the next `count` monster updates.
    pub fn race_next_monster_updates(&self, count: u32) {
        self.races.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn deletes(&self) -> Vec<(ResourceKind, ObjectKey)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete(kind, key) => Some((kind, key)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_race(&self) -> Option<u32> {
        self.races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
    }

    /// Bump the stored monster's version with a foreign annotation.
    async fn interfere(&self, key: &ObjectKey, round: u32) {
        let current = self.inner.get(ResourceKind::Monster, key).await.optional();
        if let Some(mut current) = current.unwrap() {
            current
                .meta
                .annotations
                .insert(format!("test/racer-{round}"), "touched".into());
            self.inner.update(current).await.unwrap();
        }
    }
}

#[async_trait]
impl StateStore for ObservedStore {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<StoredObject> {
        self.inner.get(kind, key).await
    }

    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<StoredObject>> {
        self.inner.list(kind).await
    }

    async fn create(&self, object: StoredObject) -> StoreResult<StoredObject> {
        let call = Call::Create(object.kind, object.key());
        let stored = self.inner.create(object).await?;
        self.record(call);
        Ok(stored)
    }

    async fn update(&self, object: StoredObject) -> StoreResult<StoredObject> {
        if object.kind == ResourceKind::Monster {
            if let Some(round) = self.take_race() {
                self.interfere(&object.key(), round).await;
            }
        }
        let call = Call::Update(object.kind, object.key());
        let stored = self.inner.update(object).await?;
        self.record(call);
        Ok(stored)
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<()> {
        self.inner.delete(kind, key).await?;
        self.record(Call::Delete(kind, key.clone()));
        Ok(())
    }

    fn watch(&self, kind: ResourceKind, filter: WatchFilter) -> WatchStream {
        self.inner.watch(kind, filter)
    }
}

/// Notification sink that records every notice and can fail on demand.
#[derive(Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<DeletionNotice>>,
    failures: AtomicU32,
    stalls: AtomicU32,
}

impl RecordingSink {
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Never answer the next `count` notices.
    pub fn stall_next(&self, count: u32) {
        self.stalls.store(count, Ordering::SeqCst);
    }

    pub fn notices(&self) -> Vec<DeletionNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_deletion(&self, notice: &DeletionNotice) -> dungeon_reconciler::Result<()> {
        if take_one(&self.stalls) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.failures) {
            return Err(Error::notification(&notice.key(), "portal returned 503"));
        }
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct Harness {
    pub memory: Arc<InMemoryStore>,
    pub store: Arc<ObservedStore>,
    pub sink: Arc<RecordingSink>,
    pub engine: ReconcileEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&test_config())
    }

    pub fn with_config(config: &ControllerConfig) -> Self {
        let memory = Arc::new(InMemoryStore::new());
        let store = Arc::new(ObservedStore::new(memory.clone()));
        let sink = Arc::new(RecordingSink::default());
        let engine = ReconcileEngine::new(store.clone(), sink.clone(), config);
        Self {
            memory,
            store,
            sink,
            engine,
        }
    }

    pub async fn create_monster(&self, name: &str, spec: MonsterSpec) -> ObjectKey {
        let key = ObjectKey::new("monsters", name);
        let monster = Monster::new(&key, spec);
        self.memory.create(monster.to_object().unwrap()).await.unwrap();
        key
    }

    /// Reconcile until a pass asks for no requeue. Returns the pass count.
    pub async fn converge(&self, key: &ObjectKey) -> usize {
        for pass in 1..=10 {
            let action = self.engine.reconcile(key).await.unwrap();
            if !action.requeue {
                return pass;
            }
        }
        panic!("{key} did not settle within 10 passes");
    }

    pub async fn monster(&self, key: &ObjectKey) -> Option<Monster> {
        self.memory
            .get(ResourceKind::Monster, key)
            .await
            .optional()
            .unwrap()
            .map(|object| Monster::from_object(object).unwrap())
    }

    pub async fn object(&self, kind: ResourceKind, key: &ObjectKey) -> Option<StoredObject> {
        self.memory.get(kind, key).await.optional().unwrap()
    }

    pub async fn update_spec(&self, key: &ObjectKey, edit: impl FnOnce(&mut MonsterSpec)) {
        let mut monster = self.monster(key).await.expect("monster exists");
        edit(&mut monster.spec);
        self.memory.update(monster.to_object().unwrap()).await.unwrap();
    }
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        conflict_retry: RetryPolicy::default()
            .with_initial_backoff(std::time::Duration::from_millis(1)),
        ..ControllerConfig::default()
    }
}

pub fn goblin() -> MonsterSpec {
    MonsterSpec {
        name: "goblin".into(),
        monster_type: "goblin".into(),
        id: 17,
        current_hp: 12,
        max_hp: 12,
        depth: 3,
        ..MonsterSpec::default()
    }
}
