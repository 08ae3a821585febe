//! Core types for Dungeon Master.
//!
//! This crate defines the object model shared by the store and the
//! reconciler:
//!
//! - **Identity**: [`ObjectKey`] and [`ResourceKind`] address every object
//! - **Metadata**: [`ObjectMeta`] carries labels, annotations, the
//!   optimistic-concurrency [`ResourceVersion`], the deletion marker and the
//!   [`FinalizerSet`]
//! - **Objects**: [`StoredObject`] is what the store persists; [`Monster`] is
//!   the typed Entity that drives reconciliation
//! - **Digests**: [`ContentDigest`] is a stable SHA-256 over payload bytes

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod digest;
pub mod error;
pub mod finalizer;
pub mod meta;
pub mod monster;
pub mod object;

// Re-export main types
pub use digest::ContentDigest;
pub use error::{Error, Result};
pub use finalizer::FinalizerSet;
pub use meta::{Labels, ObjectKey, ObjectMeta, ResourceVersion};
pub use monster::{Monster, MonsterSpec, MonsterStatus, Phase, Position};
pub use object::{ResourceKind, StoredObject};
