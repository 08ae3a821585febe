//! The Monster entity: desired state record driving reconciliation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::meta::{ObjectKey, ObjectMeta};
use crate::object::{ResourceKind, StoredObject};

/// Lifecycle phase recorded in the monster status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Never reconciled.
    #[default]
    #[serde(rename = "")]
    Unset,
    Initializing,
    Active,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Initializing => "Initializing",
            Self::Active => "Active",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("<unset>"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Grid coordinates of the monster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
}

/// Desired state of a monster, as reported by the game.
///
/// The reconciler renders it into dependents and otherwise reads only the
/// `id` used in deletion notices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonsterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub monster_type: String,
    pub id: i64,
    #[serde(rename = "hp")]
    pub current_hp: i64,
    pub max_hp: i64,
    pub depth: i64,
    pub accuracy: i64,
    pub attack_speed: i64,
    pub damage_max: i64,
    pub damage_min: i64,
    pub defense: i64,
    pub is_dead: bool,
    pub movement_speed: i64,
    pub position: Position,
    pub turns_between_regen: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawn_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub death_timestamp: Option<DateTime<Utc>>,
}

/// Observed state owned by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterStatus {
    #[serde(default)]
    pub phase: Phase,
}

/// Payload layout of a monster record in the store.
#[derive(Serialize, Deserialize)]
struct MonsterPayload {
    #[serde(default)]
    spec: MonsterSpec,
    #[serde(default)]
    status: MonsterStatus,
}

/// Typed view of a Monster record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monster {
    pub meta: ObjectMeta,
    pub spec: MonsterSpec,
    pub status: MonsterStatus,
}

impl Monster {
    /// Create a new, never-reconciled monster.
    pub fn new(key: &ObjectKey, spec: MonsterSpec) -> Self {
        Self {
            meta: ObjectMeta::new(key),
            spec,
            status: MonsterStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.meta.key()
    }

    /// Lifecycle phase recorded in the status.
    pub const fn phase(&self) -> Phase {
        self.status.phase
    }

    /// Decode from a stored object.
    ///
    /// # Errors
    ///
    /// Returns `KindMismatch` for non-monster objects and `InvalidPayload`
    /// when the payload does not decode.
    pub fn from_object(object: StoredObject) -> Result<Self> {
        if object.kind != ResourceKind::Monster {
            return Err(Error::KindMismatch {
                expected: ResourceKind::Monster,
                found: object.kind,
            });
        }
        let key = object.key();
        let payload: MonsterPayload = serde_json::from_value(object.payload).map_err(|e| {
            Error::invalid_payload(ResourceKind::Monster, key.to_string(), e.to_string())
        })?;
        Ok(Self {
            meta: object.meta,
            spec: payload.spec,
            status: payload.status,
        })
    }

    /// Encode into a stored object.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the spec cannot be encoded.
    pub fn to_object(&self) -> Result<StoredObject> {
        let payload = serde_json::to_value(MonsterPayload {
            spec: self.spec.clone(),
            status: self.status.clone(),
        })
        .map_err(|e| Error::serialization(e.to_string()))?;
        Ok(StoredObject::new(ResourceKind::Monster, self.meta.clone(), payload))
    }
}
