//! Core error types.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

use crate::object::ResourceKind;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for object model operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid {kind} payload for '{key}': {reason}")]
    InvalidPayload {
        kind: ResourceKind,
        key: String,
        reason: String,
    },

    #[error("kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error("serialization failed: {reason}")]
    Serialization { reason: String },
}

impl Error {
    /// Create an invalid payload error.
    pub fn invalid_payload(
        kind: ResourceKind,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidPayload {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}
