//! Stored objects and resource kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::ContentDigest;
use crate::meta::{ObjectKey, ObjectMeta};

/// Kinds of object held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// The Entity kind that drives reconciliation.
    Monster,
    /// Configuration resource holding the rendered monster data.
    ConfigMap,
    /// Workload; the load-bearing dependent.
    Deployment,
    /// Network resource in front of the workload.
    Service,
    /// Exposure resource routing external traffic to the service.
    Ingress,
}

impl ResourceKind {
    /// Dependent kinds owned by a Monster.
    pub const DEPENDENTS: [Self; 4] =
        [Self::ConfigMap, Self::Deployment, Self::Service, Self::Ingress];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monster => "Monster",
            Self::ConfigMap => "ConfigMap",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object as persisted by the store: kind, metadata and opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub kind: ResourceKind,
    pub meta: ObjectMeta,
    pub payload: serde_json::Value,
}

impl StoredObject {
    pub const fn new(kind: ResourceKind, meta: ObjectMeta, payload: serde_json::Value) -> Self {
        Self {
            kind,
            meta,
            payload,
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.meta.key()
    }

    /// Digest of the payload bytes.
    pub fn payload_digest(&self) -> ContentDigest {
        ContentDigest::of_value(&self.payload)
    }
}
