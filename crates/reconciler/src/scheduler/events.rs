//! Turning watch events into monster keys.

use std::collections::HashMap;

use dungeon_core::{ObjectKey, ResourceKind, ResourceVersion};
use dungeon_store::{EventType, WatchEvent};
use tracing::trace;

use crate::naming::owner_of;

/// Drops modifications that did not change the stored version.
///
/// Each watch subscription owns its own filter.
#[derive(Debug, Default)]
pub struct EventFilter {
    seen: HashMap<(ResourceKind, ObjectKey), ResourceVersion>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the event should trigger a pass.
    pub fn admit(&mut self, event: &WatchEvent) -> bool {
        let slot = (event.kind, event.key.clone());
        match event.event_type {
            EventType::Deleted => {
                self.seen.remove(&slot);
                true
            }
            EventType::Added => {
                self.seen.insert(slot, event.resource_version);
                true
            }
            EventType::Modified => {
                let previous = self.seen.insert(slot, event.resource_version);
                let changed = previous != Some(event.resource_version);
                if !changed {
                    trace!(
                        kind = %event.kind,
                        key = %event.key,
                        "Version unchanged, event dropped"
                    );
                }
                changed
            }
        }
    }
}

/// Maps events to the monster they concern.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventMapper;

impl EventMapper {
    /// Monster events map to themselves, dependents to their owner.
    ///
    /// Dependents without an ownership label map to nothing.
    pub fn map(self, event: &WatchEvent) -> Option<ObjectKey> {
        if event.kind == ResourceKind::Monster {
            return Some(event.key.clone());
        }
        let owner = owner_of(&event.key.namespace, &event.labels);
        if owner.is_none() {
            trace!(kind = %event.kind, key = %event.key, "Unowned dependent, event dropped");
        }
        owner
    }
}
