//! Error types for the reconciler.

use std::path::PathBuf;

use dungeon_core::{ObjectKey, ResourceKind};
use dungeon_store::StoreError;
use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// How the scheduler should treat a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Something the pass needed vanished underneath it.
    NotFound,
    /// Optimistic-concurrency failure that outlived the in-pass retries.
    Conflict,
    /// Network or backend trouble; retry with backoff.
    TransientIo,
    /// Retrying will not help.
    Permanent,
}

impl ErrorClass {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

/// Reconciler errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] dungeon_core::Error),

    #[error("{operation} on {kind} '{key}' still conflicting after {attempts} attempts")]
    ConflictRetryExhausted {
        operation: &'static str,
        kind: ResourceKind,
        key: ObjectKey,
        attempts: u32,
    },

    #[error("deletion notice for '{monster}' failed: {reason}")]
    Notification { monster: ObjectKey, reason: String },

    #[error("reconciliation of '{key}' exceeded the {timeout_ms}ms deadline")]
    Timeout { key: ObjectKey, timeout_ms: u64 },

    #[error("failed to render dependents of '{key}': {reason}")]
    Render { key: ObjectKey, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to read config file {}: {reason}", path.display())]
    ConfigRead { path: PathBuf, reason: String },
}

impl Error {
    pub fn notification(monster: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Notification {
            monster: monster.clone(),
            reason: reason.into(),
        }
    }

    pub fn render(key: &ObjectKey, reason: impl Into<String>) -> Self {
        Self::Render {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Classify for scheduling.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Store(StoreError::NotFound { .. }) => ErrorClass::NotFound,
            Self::Store(StoreError::Conflict { .. } | StoreError::AlreadyExists { .. })
            | Self::ConflictRetryExhausted { .. } => ErrorClass::Conflict,
            Self::Store(StoreError::Unavailable { .. })
            | Self::Notification { .. }
            | Self::Timeout { .. } => ErrorClass::TransientIo,
            Self::Store(StoreError::Invalid { .. })
            | Self::Model(_)
            | Self::Render { .. }
            | Self::InvalidConfig { .. }
            | Self::ConfigRead { .. } => ErrorClass::Permanent,
        }
    }

    /// Whether the conflict can be resolved by refetching and retrying.
    #[must_use]
    pub const fn is_store_conflict(&self) -> bool {
        match self {
            Self::Store(e) => e.is_conflict(),
            _ => false,
        }
    }
}
