//! End-to-end reconciliation scenarios against the in-memory store.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use common::{goblin, test_config, Call, Harness};
use dungeon_core::{ObjectKey, Phase, ResourceKind};
use dungeon_store::StateStore;
use dungeon_reconciler::{
    Error, ErrorClass, NotificationPolicy, RetryPolicy, CONFIG_DIGEST_ANNOTATION,
    CONTENT_DIGEST_ANNOTATION, DEFAULT_FINALIZER, OWNER_LABEL,
};

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("monsters", name)
}

#[tokio::test]
async fn test_create_walks_phases_and_renders_named_dependents() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;

    assert!(h.engine.reconcile(&monster).await.unwrap().requeue);
    let after_first = h.monster(&monster).await.unwrap();
    assert_eq!(after_first.phase(), Phase::Initializing);
    assert!(after_first.meta.finalizers.contains(DEFAULT_FINALIZER));
    assert!(h.store.calls().iter().all(|c| matches!(c, Call::Update(ResourceKind::Monster, _))));

    assert!(!h.engine.reconcile(&monster).await.unwrap().requeue);
    assert_eq!(h.monster(&monster).await.unwrap().phase(), Phase::Active);

    let expected = [
        (ResourceKind::ConfigMap, "entity-goblin-1"),
        (ResourceKind::Deployment, "workload-goblin-1"),
        (ResourceKind::Service, "workload-goblin-1"),
        (ResourceKind::Ingress, "workload-goblin-1-ingress"),
    ];
    for (kind, name) in expected {
        let child = h
            .object(kind, &key(name))
            .await
            .unwrap_or_else(|| panic!("{kind} {name} missing"));
        assert_eq!(child.meta.label(OWNER_LABEL), Some("goblin-1"));
        assert!(child.meta.annotation(CONTENT_DIGEST_ANNOTATION).is_some());
    }

    let creates: Vec<_> = h
        .store
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Create(kind, _) => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(
        creates,
        vec![
            ResourceKind::ConfigMap,
            ResourceKind::Service,
            ResourceKind::Deployment,
            ResourceKind::Ingress,
        ]
    );
}

#[tokio::test]
async fn test_converged_monster_costs_no_writes() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;
    h.converge(&monster).await;

    let before = h.memory.stats();
    assert!(!h.engine.reconcile(&monster).await.unwrap().requeue);
    assert!(!h.engine.reconcile(&monster).await.unwrap().requeue);
    assert_eq!(h.memory.stats(), before);
}

#[tokio::test]
async fn test_spec_change_rolls_workload_only_through_digest() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;
    h.converge(&monster).await;

    let config_key = key("entity-goblin-1");
    let workload_key = key("workload-goblin-1");
    let old_config = h.object(ResourceKind::ConfigMap, &config_key).await.unwrap();
    let old_workload = h.object(ResourceKind::Deployment, &workload_key).await.unwrap();
    let old_network = h.object(ResourceKind::Service, &workload_key).await.unwrap();

    h.update_spec(&monster, |spec| spec.current_hp = 4).await;
    h.store.clear_calls();
    h.converge(&monster).await;

    let new_config = h.object(ResourceKind::ConfigMap, &config_key).await.unwrap();
    let new_workload = h.object(ResourceKind::Deployment, &workload_key).await.unwrap();
    assert_ne!(
        old_config.meta.annotation(CONTENT_DIGEST_ANNOTATION),
        new_config.meta.annotation(CONTENT_DIGEST_ANNOTATION)
    );

    let trigger = new_workload.meta.annotation(CONFIG_DIGEST_ANNOTATION);
    assert_ne!(old_workload.meta.annotation(CONFIG_DIGEST_ANNOTATION), trigger);
    assert_eq!(trigger, new_config.meta.annotation(CONTENT_DIGEST_ANNOTATION));
    assert_eq!(
        new_workload.payload["template"]["metadata"]["annotations"][CONFIG_DIGEST_ANNOTATION]
            .as_str(),
        trigger
    );
    assert_eq!(new_workload.payload["replicas"], old_workload.payload["replicas"]);

    // Only the two digest-bearing dependents were rewritten.
    let mut updated: Vec<_> = h
        .store
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Update(kind, _) => Some(kind),
            _ => None,
        })
        .collect();
    updated.sort_by_key(|kind| kind.as_str());
    assert_eq!(updated, vec![ResourceKind::ConfigMap, ResourceKind::Deployment]);
    let network = h.object(ResourceKind::Service, &workload_key).await.unwrap();
    assert_eq!(network.meta.resource_version, old_network.meta.resource_version);
}

#[tokio::test]
async fn test_delete_notifies_once_and_tears_down_in_order() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;
    h.converge(&monster).await;
    h.store.clear_calls();

    h.memory.delete(ResourceKind::Monster, &monster).await.unwrap();
    let marked = h.monster(&monster).await.unwrap();
    assert!(marked.meta.is_deleting());
    assert!(marked.meta.finalizers.contains(DEFAULT_FINALIZER));

    assert!(!h.engine.reconcile(&monster).await.unwrap().requeue);

    let notices = h.sink.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices.first().map(|n| n.monster_id), Some(17));
    assert_eq!(notices.first().map(|n| n.monster_name.as_str()), Some("goblin-1"));

    assert_eq!(
        h.store.deletes(),
        vec![
            (ResourceKind::Deployment, key("workload-goblin-1")),
            (ResourceKind::Ingress, key("workload-goblin-1-ingress")),
            (ResourceKind::Service, key("workload-goblin-1")),
            (ResourceKind::ConfigMap, key("entity-goblin-1")),
        ]
    );
    assert!(h.memory.is_empty().await);

    // Nothing left: a further pass is a no-op.
    let before = h.memory.stats();
    h.engine.reconcile(&monster).await.unwrap();
    assert_eq!(h.memory.stats(), before);
    assert_eq!(h.sink.notices().len(), 1);
}

#[tokio::test]
async fn test_deletion_marker_is_never_followed_by_new_finalizers_or_renders() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;

    // Marked before the first pass could add the token: ours is never added.
    let mut object = h.memory.get(ResourceKind::Monster, &monster).await.unwrap();
    object.meta.finalizers.insert("portal/archive");
    h.memory.update(object).await.unwrap();
    h.memory.delete(ResourceKind::Monster, &monster).await.unwrap();
    h.store.clear_calls();

    h.converge(&monster).await;
    let marked = h.monster(&monster).await.unwrap();
    assert!(!marked.meta.finalizers.contains(DEFAULT_FINALIZER));
    assert_eq!(marked.phase(), Phase::Unset);
    assert!(h.store.calls().is_empty());
    assert!(h.sink.notices().is_empty());
}

#[tokio::test]
async fn test_required_notice_failure_retries_whole_teardown() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;
    h.converge(&monster).await;
    h.memory.delete(ResourceKind::Monster, &monster).await.unwrap();
    h.sink.fail_next(1);

    let err = h.engine.reconcile(&monster).await.unwrap_err();
    assert!(matches!(err, Error::Notification { .. }));
    assert_eq!(err.class(), ErrorClass::TransientIo);
    assert!(h.object(ResourceKind::Deployment, &key("workload-goblin-1")).await.is_some());

    h.engine.reconcile(&monster).await.unwrap();
    assert_eq!(h.sink.notices().len(), 1);
    assert!(h.memory.is_empty().await);
}

#[tokio::test]
async fn test_best_effort_notice_failure_still_tears_down() {
    let mut config = test_config();
    config.notification.policy = NotificationPolicy::BestEffort;
    let h = Harness::with_config(&config);
    let monster = h.create_monster("goblin-1", goblin()).await;
    h.converge(&monster).await;
    h.memory.delete(ResourceKind::Monster, &monster).await.unwrap();
    h.sink.fail_next(1);

    h.engine.reconcile(&monster).await.unwrap();
    assert!(h.sink.notices().is_empty());
    assert!(h.memory.is_empty().await);
}

#[tokio::test]
async fn test_vanished_workload_cascades_instead_of_recreating() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;
    h.converge(&monster).await;

    h.memory
        .delete(ResourceKind::Deployment, &key("workload-goblin-1"))
        .await
        .unwrap();
    h.store.clear_calls();

    assert!(!h.engine.reconcile(&monster).await.unwrap().requeue);

    assert!(h.memory.is_empty().await, "monster and dependents must be gone");
    assert_eq!(h.sink.notices().len(), 1);
    assert!(
        !h.store
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Create(ResourceKind::Deployment, _))),
        "workload must not be recreated"
    );
    assert_eq!(
        h.store.deletes().first(),
        Some(&(ResourceKind::Ingress, key("workload-goblin-1-ingress")))
    );
    assert_eq!(
        h.store.deletes().last(),
        Some(&(ResourceKind::Monster, key("goblin-1")))
    );
}

#[tokio::test]
async fn test_drift_is_ignored_before_activation() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;
    h.engine.reconcile(&monster).await.unwrap();

    // Initializing with no workload yet: the pass builds it.
    h.engine.reconcile(&monster).await.unwrap();
    assert!(h.object(ResourceKind::Deployment, &key("workload-goblin-1")).await.is_some());
    assert_eq!(h.monster(&monster).await.unwrap().phase(), Phase::Active);
    assert!(h.sink.notices().is_empty());
}

#[tokio::test]
async fn test_racing_writer_is_absorbed_by_conflict_retry() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;

    h.store.race_next_monster_updates(2);
    assert!(h.engine.reconcile(&monster).await.unwrap().requeue);

    let current = h.monster(&monster).await.unwrap();
    assert_eq!(current.phase(), Phase::Initializing);
    assert!(current.meta.finalizers.contains(DEFAULT_FINALIZER));
    // Neither racing write was lost.
    assert_eq!(current.meta.annotation("test/racer-2"), Some("touched"));
    assert_eq!(current.meta.annotation("test/racer-1"), Some("touched"));
}

#[tokio::test]
async fn test_release_uses_fresh_version_under_races() {
    let h = Harness::new();
    let monster = h.create_monster("goblin-1", goblin()).await;
    h.converge(&monster).await;
    h.memory.delete(ResourceKind::Monster, &monster).await.unwrap();

    h.store.race_next_monster_updates(3);
    h.engine.reconcile(&monster).await.unwrap();
    assert!(h.memory.is_empty().await);
}

#[tokio::test]
async fn test_conflict_budget_exhaustion_is_retryable() {
    let mut config = test_config();
    config.conflict_retry = RetryPolicy::immediate().with_max_attempts(2);
    let h = Harness::with_config(&config);
    let monster = h.create_monster("goblin-1", goblin()).await;

    h.store.race_next_monster_updates(5);
    let err = h.engine.reconcile(&monster).await.unwrap_err();
    assert!(matches!(err, Error::ConflictRetryExhausted { attempts: 2, .. }));
    assert!(err.class().is_retryable());

    // The racer has run out; the next pass goes through.
    h.store.race_next_monster_updates(0);
    h.converge(&monster).await;
    assert_eq!(h.monster(&monster).await.unwrap().phase(), Phase::Active);
}

#[tokio::test]
async fn test_monsters_in_other_namespaces_keep_their_own_dependents() {
    let h = Harness::new();
    let here = h.create_monster("goblin-1", goblin()).await;
    let there = ObjectKey::new("depths", "goblin-1");
    h.memory
        .create(
            dungeon_core::Monster::new(&there, goblin())
                .to_object()
                .unwrap(),
        )
        .await
        .unwrap();

    h.converge(&here).await;
    h.converge(&there).await;

    assert!(h
        .object(ResourceKind::Deployment, &ObjectKey::new("depths", "workload-goblin-1"))
        .await
        .is_some());
    assert!(h.object(ResourceKind::Deployment, &key("workload-goblin-1")).await.is_some());
}
