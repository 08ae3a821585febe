//! K8s-style reconciliation loop for monsters.
//!
//! Each monster record in the store owns four dependents: a configuration
//! resource, a workload, a network resource and an exposure resource. This
//! crate keeps them converged:
//!
//! - **Reconcile**: one pass per monster walks the phase machine
//!   (`""` → Initializing → Active) and applies dependents whose rendered
//!   digest changed
//! - **Finalize**: a monster marked for deletion is held by a finalizer token
//!   until the portal has been notified and every dependent is gone
//! - **Drift**: an Active monster whose workload vanished is deleted along
//!   with the rest of its dependents
//! - **Schedule**: watch events feed a deduplicating queue drained by a
//!   worker pool, with per-key backoff on failure
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use dungeon_reconciler::{Controller, ControllerConfig, HttpNotificationSink};
//! use dungeon_store::InMemoryStore;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> dungeon_reconciler::Result<()> {
//!     let config = ControllerConfig::from_env();
//!     let store = Arc::new(InMemoryStore::new());
//!     let sink = Arc::new(HttpNotificationSink::new(&config.notification)?);
//!     let controller = Controller::new(store, sink, &config)?;
//!
//!     let (stop_tx, stop_rx) = watch::channel(false);
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = stop_tx.send(true);
//!     });
//!     controller.run(stop_rx).await
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod apply;
pub mod config;
pub mod drift;
pub mod error;
pub mod finalizer;
pub mod naming;
pub mod notify;
pub mod reconciler;
pub mod render;
pub mod retry;
pub mod scheduler;

// Re-export main types
pub use apply::{ApplyOutcome, Applier};
pub use config::{
    ControllerConfig, IngressConfig, NotificationConfig, RateLimitConfig, WorkloadConfig,
};
pub use drift::{Drift, DriftDetector};
pub use error::{Error, ErrorClass, Result};
pub use finalizer::{FinalizerProtocol, Release};
pub use naming::{
    owner_of, ChildNames, NamingConfig, CONFIG_DIGEST_ANNOTATION, CONTENT_DIGEST_ANNOTATION,
    DEFAULT_FINALIZER, OWNER_LABEL,
};
pub use notify::{DeletionNotice, HttpNotificationSink, NotificationPolicy, NotificationSink};
pub use reconciler::{Action, ReconcileEngine};
pub use render::{ChildResourceDescriptor, Renderer, TemplateRenderer};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{Controller, EventFilter, EventMapper, RateLimiter, WorkQueue};
