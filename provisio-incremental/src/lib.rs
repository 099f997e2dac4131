//! Provisio incremental memoization layer
//!
//! This crate provides the memoization machinery behind provisio's
//! resolution cache: two memo slots per key, push-based invalidation
//! over a dependency graph, and pull-based recomputation.
//!
//! # Architecture
//!
//! - **Memo tables** hold one computed value per key and slot
//!   ([`Slot::Own`] and [`Slot::Resolved`]).
//! - **A revision clock** is bumped by every invalidation; values computed
//!   across an invalidation are returned to the caller but never cached.
//! - **The invalidation bridge** clears a key and the resolved slot of
//!   every transitive dependent, as reported by a [`DependencySource`].
//!
//! # Example
//!
//! ```rust,ignore
//! use provisio_incremental::{MemoDb, Slot};
//!
//! let db = MemoDb::<String, u32>::new(true);
//! let key = "web01".to_string();
//! let value = db.get_or_compute(Slot::Resolved, &key, || Ok::<_, ()>(42))?;
//! ```

#![warn(missing_debug_implementations)]

pub mod db;
pub mod invalidation;
pub mod memo;
pub mod metrics;
pub mod revision;

pub use db::MemoDb;
pub use invalidation::{Change, DependencySource, InvalidationBridge};
pub use memo::{MemoEntry, MemoTable, Slot};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use revision::{Revision, RevisionClock};
