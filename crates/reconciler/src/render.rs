//! Rendering a monster into the payloads of its dependents.

use dungeon_core::{
    ContentDigest, Labels, Monster, ObjectKey, ObjectMeta, ResourceKind, StoredObject,
};
use serde_json::{json, Value};

use crate::config::{IngressConfig, WorkloadConfig};
use crate::error::{Error, Result};
use crate::naming::{ChildNames, CONFIG_DIGEST_ANNOTATION, CONTENT_DIGEST_ANNOTATION};

/// Desired state of one dependent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildResourceDescriptor {
    pub kind: ResourceKind,
    pub key: ObjectKey,
    pub labels: Labels,
    pub annotations: Labels,
    pub payload: Value,
}

impl ChildResourceDescriptor {
    /// Digest over the rendered payload.
    pub fn digest(&self) -> ContentDigest {
        ContentDigest::of_value(&self.payload)
    }

    /// An object ready to create, with the content digest embedded.
    pub fn to_object(&self) -> StoredObject {
        let mut meta = ObjectMeta::new(&self.key);
        meta.labels.clone_from(&self.labels);
        meta.annotations.clone_from(&self.annotations);
        meta.annotations
            .insert(CONTENT_DIGEST_ANNOTATION.to_string(), self.digest().into());
        StoredObject::new(self.kind, meta, self.payload.clone())
    }
}

/// Produces the dependents of a monster.
///
/// Implementations must be pure: the same monster and names always render
/// the same descriptors. Descriptors come back in apply order.
pub trait Renderer: Send + Sync {
    /// # Errors
    ///
    /// Returns `Render` if the monster cannot be turned into payloads.
    fn render(&self, monster: &Monster, names: &ChildNames) -> Result<Vec<ChildResourceDescriptor>>;
}

/// Default renderer: a config resource holding the serialized spec, a
/// single-replica workload serving it, a service in front of the workload and
/// a path-prefixed ingress.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    workload: WorkloadConfig,
    ingress: IngressConfig,
}

impl TemplateRenderer {
    pub const fn new(workload: WorkloadConfig, ingress: IngressConfig) -> Self {
        Self { workload, ingress }
    }

    fn config_payload(monster: &Monster, names: &ChildNames) -> Result<Value> {
        let spec = serde_json::to_string_pretty(&monster.spec)
            .map_err(|e| Error::render(&names.owner, e.to_string()))?;
        Ok(json!({
            "data": {
                "monster.json": spec,
            }
        }))
    }

    fn network_payload(&self, names: &ChildNames) -> Value {
        let port = self.workload.port;
        json!({
            "type": "ClusterIP",
            "selector": { "app": names.workload.name },
            "ports": [{ "name": "http", "protocol": "TCP", "port": port, "targetPort": port }],
        })
    }

    fn workload_payload(&self, names: &ChildNames, config_digest: &ContentDigest) -> Value {
        json!({
            "replicas": 1,
            "selector": { "matchLabels": { "app": names.workload.name } },
            "strategy": {
                "type": "RollingUpdate",
                "rollingUpdate": { "maxUnavailable": 1, "maxSurge": 1 },
            },
            "template": {
                "metadata": {
                    "labels": { "app": names.workload.name },
                    "annotations": { CONFIG_DIGEST_ANNOTATION: config_digest.as_str() },
                },
                "spec": {
                    "containers": [{
                        "name": "nginx",
                        "image": self.workload.image,
                        "ports": [{ "containerPort": self.workload.port }],
                        "volumeMounts": [{
                            "name": "monster-data",
                            "mountPath": "/usr/share/nginx/html/monster.json",
                            "subPath": "monster.json",
                        }],
                    }],
                    "volumes": [{
                        "name": "monster-data",
                        "configMap": { "name": names.config.name },
                    }],
                },
            },
        })
    }

    fn exposure_payload(&self, names: &ChildNames) -> Value {
        json!({
            "ingressClassName": self.ingress.class_name,
            "rules": [{
                "host": self.ingress.host,
                "http": {
                    "paths": [{
                        "path": format!("/{}", names.owner.name),
                        "pathType": "Prefix",
                        "backend": {
                            "service": {
                                "name": names.network.name,
                                "port": { "number": self.workload.port },
                            }
                        },
                    }]
                },
            }],
        })
    }
}

impl Renderer for TemplateRenderer {
    fn render(
        &self,
        monster: &Monster,
        names: &ChildNames,
    ) -> Result<Vec<ChildResourceDescriptor>> {
        let labels = names.owner_labels();
        let descriptor = |kind, key: &ObjectKey, payload| ChildResourceDescriptor {
            kind,
            key: key.clone(),
            labels: labels.clone(),
            annotations: Labels::new(),
            payload,
        };

        let config = descriptor(
            ResourceKind::ConfigMap,
            &names.config,
            Self::config_payload(monster, names)?,
        );
        let config_digest = config.digest();

        let network = descriptor(
            ResourceKind::Service,
            &names.network,
            self.network_payload(names),
        );

        let mut workload = descriptor(
            ResourceKind::Deployment,
            &names.workload,
            self.workload_payload(names, &config_digest),
        );
        workload
            .annotations
            .insert(CONFIG_DIGEST_ANNOTATION.to_string(), config_digest.into());

        let exposure = descriptor(
            ResourceKind::Ingress,
            &names.exposure,
            self.exposure_payload(names),
        );

        Ok(vec![config, network, workload, exposure])
    }
}
