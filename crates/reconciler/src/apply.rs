//! Idempotent create-or-update of dependents.
//!
//! A dependent is written only when the digest of the desired payload differs
//! from the digest embedded in the stored object, so re-applying unchanged
//! state costs reads only.

use std::sync::Arc;

use dungeon_core::{ContentDigest, ObjectKey, ResourceKind};
use dungeon_store::{OptionalExt, StateStore};
use tracing::{debug, info};

use crate::error::Result;
use crate::naming::CONTENT_DIGEST_ANNOTATION;
use crate::render::ChildResourceDescriptor;
use crate::retry::RetryPolicy;

/// What an apply did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Writes dependents against the store.
#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
}

impl Applier {
    /// Applier writing through `store`, retrying conflicts under `retry`.
    pub fn new(store: Arc<dyn StateStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Converge one dependent to its descriptor.
    ///
    /// # Errors
    ///
    /// Returns `ConflictRetryExhausted` if the write keeps racing other
    /// writers, or the store error that stopped it.
    pub async fn apply(&self, desired: &ChildResourceDescriptor) -> Result<ApplyOutcome> {
        let digest = desired.digest();
        let mut backoff = self.retry.backoff();
        loop {
            match self.try_apply(desired, &digest).await {
                Err(e) if e.is_store_conflict() => {
                    backoff.wait("apply", desired.kind, &desired.key).await?;
                }
                other => return other,
            }
        }
    }

    async fn try_apply(
        &self,
        desired: &ChildResourceDescriptor,
        digest: &ContentDigest,
    ) -> Result<ApplyOutcome> {
        let Some(mut existing) = self.store.get(desired.kind, &desired.key).await.optional()? else {
            self.store.create(desired.to_object()).await?;
            info!(kind = %desired.kind, key = %desired.key, "Created dependent");
            return Ok(ApplyOutcome::Created);
        };

        if digest.matches(existing.meta.annotation(CONTENT_DIGEST_ANNOTATION)) {
            debug!(kind = %desired.kind, key = %desired.key, "Dependent up to date");
            return Ok(ApplyOutcome::Unchanged);
        }

        // Keep labels and annotations written by others; ours win on overlap.
        existing.meta.labels.extend(desired.labels.clone());
        existing.meta.annotations.extend(desired.annotations.clone());
        existing
            .meta
            .annotations
            .insert(CONTENT_DIGEST_ANNOTATION.to_string(), digest.clone().into());
        existing.payload = desired.payload.clone();

        self.store.update(existing).await?;
        info!(kind = %desired.kind, key = %desired.key, digest = %digest, "Updated dependent");
        Ok(ApplyOutcome::Updated)
    }

    /// Delete a dependent, treating absence as success.
    ///
    /// Returns whether the object existed.
    ///
    /// # Errors
    ///
    /// Propagates every store error other than `NotFound`.
    pub async fn delete_if_present(&self, kind: ResourceKind, key: &ObjectKey) -> Result<bool> {
        match self.store.delete(kind, key).await {
            Ok(()) => {
                info!(%kind, %key, "Deleted dependent");
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!(%kind, %key, "Dependent already gone");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use dungeon_core::Labels;
    use dungeon_store::{InMemoryStore, StoreError, StoreOp};
    use serde_json::json;

    use super::*;
    use crate::error::Error;

    fn descriptor(replicas: u32) -> ChildResourceDescriptor {
        ChildResourceDescriptor {
            kind: ResourceKind::Deployment,
            key: ObjectKey::new("monsters", "workload-goblin-1"),
            labels: Labels::from([("dungeon-master/owner".to_string(), "goblin-1".to_string())]),
            annotations: Labels::new(),
            payload: json!({ "replicas": replicas }),
        }
    }

    fn setup() -> (Arc<InMemoryStore>, Applier) {
        let store = Arc::new(InMemoryStore::new());
        let applier = Applier::new(store.clone(), RetryPolicy::immediate());
        (store, applier)
    }

    #[tokio::test]
    async fn test_create_then_unchanged() {
        let (store, applier) = setup();
        assert_eq!(applier.apply(&descriptor(1)).await.unwrap(), ApplyOutcome::Created);
        assert_eq!(applier.apply(&descriptor(1)).await.unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(store.stats().total(), 1);
    }

    #[tokio::test]
    async fn test_changed_payload_updates_and_keeps_foreign_labels() {
        let (store, applier) = setup();
        applier.apply(&descriptor(1)).await.unwrap();

        let key = ObjectKey::new("monsters", "workload-goblin-1");
        let mut stored = store.get(ResourceKind::Deployment, &key).await.unwrap();
        stored.meta.labels.insert("team".into(), "ops".into());
        store.update(stored).await.unwrap();

        assert_eq!(applier.apply(&descriptor(2)).await.unwrap(), ApplyOutcome::Updated);
        let stored = store.get(ResourceKind::Deployment, &key).await.unwrap();
        assert_eq!(stored.payload, json!({ "replicas": 2 }));
        assert_eq!(stored.meta.label("team"), Some("ops"));
        assert_eq!(
            stored.meta.annotation(CONTENT_DIGEST_ANNOTATION),
            Some(descriptor(2).digest().as_str())
        );
    }

    #[tokio::test]
    async fn test_conflict_is_retried() {
        let (store, applier) = setup();
        applier.apply(&descriptor(1)).await.unwrap();

        let key = ObjectKey::new("monsters", "workload-goblin-1");
        store
            .fail_next(
                StoreOp::Update,
                StoreError::Conflict {
                    kind: ResourceKind::Deployment,
                    key,
                    expected: dungeon_core::ResourceVersion::new(1),
                    actual: dungeon_core::ResourceVersion::new(2),
                },
            )
            .await;

        assert_eq!(applier.apply(&descriptor(3)).await.unwrap(), ApplyOutcome::Updated);
    }

    #[tokio::test]
    async fn test_create_race_is_retried_as_update() {
        let (store, applier) = setup();
        store
            .fail_next(
                StoreOp::Create,
                StoreError::AlreadyExists {
                    kind: ResourceKind::Deployment,
                    key: ObjectKey::new("monsters", "workload-goblin-1"),
                },
            )
            .await;

        assert_eq!(applier.apply(&descriptor(1)).await.unwrap(), ApplyOutcome::Created);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface() {
        let store = Arc::new(InMemoryStore::new());
        let applier = Applier::new(store.clone(), RetryPolicy::immediate().with_max_attempts(2));
        for _ in 0..2 {
            store
                .fail_next(
                    StoreOp::Create,
                    StoreError::AlreadyExists {
                        kind: ResourceKind::Deployment,
                        key: ObjectKey::new("monsters", "workload-goblin-1"),
                    },
                )
                .await;
        }

        let result = applier.apply(&descriptor(1)).await;
        assert!(matches!(result, Err(Error::ConflictRetryExhausted { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn test_delete_if_present() {
        let (_store, applier) = setup();
        applier.apply(&descriptor(1)).await.unwrap();
        let key = ObjectKey::new("monsters", "workload-goblin-1");
        assert!(applier.delete_if_present(ResourceKind::Deployment, &key).await.unwrap());
        assert!(!applier.delete_if_present(ResourceKind::Deployment, &key).await.unwrap());
    }
}
