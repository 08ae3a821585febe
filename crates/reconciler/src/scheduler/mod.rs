//! Scheduling of reconciliation passes.
//!
//! Watch events are filtered, mapped to the owning monster and pushed onto a
//! deduplicating [`WorkQueue`]. A fixed pool of workers pulls keys and runs
//! one pass each under a deadline. Failed passes come back through a per-key
//! [`RateLimiter`]; permanent failures are logged and dropped.

pub mod controller;
pub mod events;
pub mod queue;
pub mod rate_limit;

pub use controller::Controller;
pub use events::{EventFilter, EventMapper};
pub use queue::WorkQueue;
pub use rate_limit::RateLimiter;
