//! Store trait and the tracing decorator.

use async_trait::async_trait;
use dungeon_core::{ObjectKey, ResourceKind, StoredObject};

use crate::error::StoreResult;
use crate::watch::{WatchFilter, WatchStream};

/// Keyed object store with optimistic concurrency.
///
/// Writes return the object as stored, carrying its new version token.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch one object.
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<StoredObject>;

    /// List every object of a kind.
    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<StoredObject>>;

    /// Create an object. Fails with `AlreadyExists` if the key is taken.
    async fn create(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Replace an object.
    ///
    /// `object.meta.resource_version` is the precondition: the write fails with
    /// `Conflict` unless it equals the version the store currently holds. The
    /// deletion marker is owned by the store and cannot be set or cleared here.
    /// An object being deleted is removed once its finalizer set is empty.
    async fn update(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Request deletion.
    ///
    /// Objects without finalizers disappear immediately; otherwise the
    /// deletion marker is set and removal waits for the finalizers to clear.
    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<()>;

    /// Subscribe to changes of one kind.
    ///
    /// The stream ends if the subscriber falls too far behind to be given
    /// every event. Callers resubscribe and relist to recover.
    fn watch(&self, kind: ResourceKind, filter: WatchFilter) -> WatchStream;
}

/// A wrapper that adds tracing to a store.
pub struct TracingStore<S: StateStore> {
    inner: S,
}

impl<S: StateStore> TracingStore<S> {
    /// Create a new tracing store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: StateStore> StateStore for TracingStore<S> {
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<StoredObject> {
        tracing::debug!(%kind, %key, "Getting object");
        self.inner.get(kind, key).await
    }

    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<StoredObject>> {
        tracing::debug!(%kind, "Listing objects");
        self.inner.list(kind).await
    }

    async fn create(&self, object: StoredObject) -> StoreResult<StoredObject> {
        tracing::debug!(kind = %object.kind, key = %object.key(), "Creating object");
        let result = self.inner.create(object).await;
        if let Ok(ref stored) = result {
            tracing::trace!(version = %stored.meta.resource_version, "Object created");
        }
        result
    }

    async fn update(&self, object: StoredObject) -> StoreResult<StoredObject> {
        tracing::debug!(
            kind = %object.kind,
            key = %object.key(),
            version = %object.meta.resource_version,
            "Updating object"
        );
        let result = self.inner.update(object).await;
        if let Ok(ref stored) = result {
            tracing::trace!(version = %stored.meta.resource_version, "Object updated");
        }
        result
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<()> {
        tracing::debug!(%kind, %key, "Deleting object");
        self.inner.delete(kind, key).await
    }

    fn watch(&self, kind: ResourceKind, filter: WatchFilter) -> WatchStream {
        tracing::debug!(%kind, ?filter, "Opening watch");
        self.inner.watch(kind, filter)
    }
}
