//! Watch events and filters.

use std::pin::Pin;

use dungeon_core::{Labels, ObjectKey, ResourceKind, ResourceVersion, StoredObject};
use futures::Stream;
use serde::{Deserialize, Serialize};

/// Kind of change observed on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A change notification for a single object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub kind: ResourceKind,
    pub key: ObjectKey,
    pub resource_version: ResourceVersion,
    /// Labels at the time of the change, so owners can be resolved without a
    /// read.
    pub labels: Labels,
}

impl WatchEvent {
    /// Event describing a write to `object`.
    pub fn from_object(event_type: EventType, object: &StoredObject) -> Self {
        Self {
            event_type,
            kind: object.kind,
            key: object.key(),
            resource_version: object.meta.resource_version,
            labels: object.meta.labels.clone(),
        }
    }
}

/// Filter applied to a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchFilter {
    /// Every object of the kind.
    All,
    /// Only objects carrying the label, whatever its value.
    HasLabel(String),
}

impl WatchFilter {
    pub fn matches(&self, labels: &Labels) -> bool {
        match self {
            Self::All => true,
            Self::HasLabel(label) => labels.contains_key(label),
        }
    }
}

/// Stream of change events for one kind.
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;
