//! Query-level cache over the event collection.
//!
//! A query row remembers which events a (user, start, end) request returned
//! and when it was last refreshed. Requests are served from it until the
//! freshness timeout passes, then refetched from the calendar provider and
//! merged back into the shared event collection.

pub mod freshness;
pub mod locks;
pub mod manager;
pub mod reconciler;

pub use freshness::is_stale;
pub use locks::RefreshLocks;
pub use manager::QueryCacheManager;
pub use reconciler::{EventReconciler, UPSERT_BATCH_SIZE};
