//! Deterministic child names and the ownership relation.
//!
//! Children are found by name, never by listing: every dependent key is a
//! pure function of the owning monster's key. The reverse direction uses the
//! ownership label, so a change to any dependent maps straight back to the
//! monster that owns it.

use dungeon_core::{Labels, ObjectKey, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Label on every dependent naming the owning monster.
pub const OWNER_LABEL: &str = "dungeon-master/owner";

/// Digest of the payload a dependent was last written with.
pub const CONTENT_DIGEST_ANNOTATION: &str = "dungeon-master/content-digest";

/// Digest of the configuration resource, stamped on the workload and its pod
/// template so a configuration change rolls the workload.
pub const CONFIG_DIGEST_ANNOTATION: &str = "dungeon-master/config-digest";

/// Finalizer token owned by the controller unless configured otherwise.
pub const DEFAULT_FINALIZER: &str = "dungeon-master/cleanup";

/// Name prefixes for dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub config_prefix: String,
    pub workload_prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            config_prefix: "entity".to_string(),
            workload_prefix: "workload".to_string(),
        }
    }
}

impl NamingConfig {
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty prefix.
    pub fn validate(&self) -> Result<()> {
        if self.config_prefix.is_empty() || self.workload_prefix.is_empty() {
            return Err(Error::invalid_config("naming prefixes must not be empty"));
        }
        Ok(())
    }
}

/// Keys of every dependent of one monster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNames {
    pub owner: ObjectKey,
    pub config: ObjectKey,
    pub workload: ObjectKey,
    pub network: ObjectKey,
    pub exposure: ObjectKey,
}

impl ChildNames {
    /// Derive the dependent keys of a monster. Dependents share its namespace.
    pub fn for_entity(owner: &ObjectKey, naming: &NamingConfig) -> Self {
        let ns = owner.namespace.as_str();
        let name = owner.name.as_str();
        let workload = format!("{}-{name}", naming.workload_prefix);
        Self {
            owner: owner.clone(),
            config: ObjectKey::new(ns, format!("{}-{name}", naming.config_prefix)),
            workload: ObjectKey::new(ns, workload.clone()),
            network: ObjectKey::new(ns, workload.clone()),
            exposure: ObjectKey::new(ns, format!("{workload}-ingress")),
        }
    }

    /// Key of the dependent of `kind`, or `None` for the monster kind.
    pub const fn key_for(&self, kind: ResourceKind) -> Option<&ObjectKey> {
        match kind {
            ResourceKind::Monster => None,
            ResourceKind::ConfigMap => Some(&self.config),
            ResourceKind::Deployment => Some(&self.workload),
            ResourceKind::Service => Some(&self.network),
            ResourceKind::Ingress => Some(&self.exposure),
        }
    }

    /// Dependents in teardown order: workload first, configuration last.
    pub fn teardown_order(&self) -> [(ResourceKind, &ObjectKey); 4] {
        [
            (ResourceKind::Deployment, &self.workload),
            (ResourceKind::Ingress, &self.exposure),
            (ResourceKind::Service, &self.network),
            (ResourceKind::ConfigMap, &self.config),
        ]
    }

    /// Labels every dependent carries.
    pub fn owner_labels(&self) -> Labels {
        Labels::from([(OWNER_LABEL.to_string(), self.owner.name.clone())])
    }
}

/// Owning monster of a dependent, read from its ownership label.
///
/// The monster lives in the dependent's namespace.
pub fn owner_of(namespace: &str, labels: &Labels) -> Option<ObjectKey> {
    labels
        .get(OWNER_LABEL)
        .filter(|owner| !owner.is_empty())
        .map(|owner| ObjectKey::new(namespace, owner.clone()))
}
