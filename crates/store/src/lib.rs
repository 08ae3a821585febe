//! Keyed object store contract for Dungeon Master.
//!
//! The store is an external collaborator: something that offers
//! get/list/create/update/delete with an opaque version token per object and a
//! watch stream of change events. This crate defines that contract and ships
//! two implementations:
//!
//! - [`InMemoryStore`]: a faithful in-process store (optimistic concurrency,
//!   finalizer-gated deletion, broadcast watches) used by tests and the demo
//!   binary
//! - [`TracingStore`]: a decorator that logs every call
//!
//! # Example
//!
//! ```ignore
//! use dungeon_store::{InMemoryStore, StateStore, WatchFilter};
//! use dungeon_core::ResourceKind;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::new();
//!     let mut watch = store.watch(ResourceKind::Monster, WatchFilter::All);
//!     // store.create(...).await?;
//!     // let event = watch.next().await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod memory;
pub mod store;
pub mod watch;

// Re-export main types
pub use error::{OptionalExt, StoreError, StoreResult};
pub use memory::{InMemoryStore, StoreOp, WriteStats};
pub use store::{StateStore, TracingStore};
pub use watch::{EventType, WatchEvent, WatchFilter, WatchStream};
