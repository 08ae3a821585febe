//! Error types for store operations.

use dungeon_core::{ObjectKey, ResourceKind, ResourceVersion};
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store error taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    /// The write carried a stale version token.
    #[error("version conflict on {kind} '{key}': wrote against {expected}, store holds {actual}")]
    Conflict {
        kind: ResourceKind,
        key: ObjectKey,
        expected: ResourceVersion,
        actual: ResourceVersion,
    },

    /// Create raced with another writer.
    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: ResourceKind, key: ObjectKey },

    /// Network or backend unavailability.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The store refused the object.
    #[error("invalid {kind} '{key}': {reason}")]
    Invalid {
        kind: ResourceKind,
        key: ObjectKey,
        reason: String,
    },
}

impl StoreError {
    pub fn not_found(kind: ResourceKind, key: &ObjectKey) -> Self {
        Self::NotFound {
            kind,
            key: key.clone(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn invalid(kind: ResourceKind, key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            key: key.clone(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a refetch-and-retry can resolve this error.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }
}

/// Treat `NotFound` as absence.
pub trait OptionalExt<T> {
    /// # Errors
    ///
    /// Propagates every error other than `NotFound`.
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for StoreResult<T> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
