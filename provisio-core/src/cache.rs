//! Resolution cache.
//!
//! A thin layer over [`MemoDb`] keyed by [`EntityRef`]: the `own` slot
//! holds an entity merged onto the settings node, the `resolved` slot the
//! full chain. Mutations push [`Change`]s through the invalidation bridge;
//! the next read recomputes.

use crate::entity::{Attrs, EntityRef};
use crate::error::Result;
use provisio_incremental::{Change, DependencySource, InvalidationBridge, MemoDb, MetricsSnapshot, Slot};
use std::sync::Arc;

#[derive(Debug)]
pub struct ResolutionCache {
    bridge: InvalidationBridge<EntityRef, Arc<Attrs>>,
}

impl ResolutionCache {
    pub fn new(enabled: bool) -> Self {
        ResolutionCache {
            bridge: InvalidationBridge::new(Arc::new(MemoDb::new(enabled))),
        }
    }

    fn db(&self) -> &MemoDb<EntityRef, Arc<Attrs>> {
        self.bridge.db()
    }

    pub fn is_enabled(&self) -> bool {
        self.db().is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.db().set_enabled(enabled);
    }

    pub fn get_or_compute(
        &self,
        slot: Slot,
        key: &EntityRef,
        compute: impl FnOnce() -> Result<Attrs>,
    ) -> Result<Arc<Attrs>> {
        self.db().get_or_compute(slot, key, || compute().map(Arc::new))
    }

    pub fn is_cached(&self, slot: Slot, key: &EntityRef) -> bool {
        self.db().is_cached(slot, key)
    }

    /// Push a batch of changes, returning the number of keys touched
    pub fn invalidate(&self, changes: Vec<Change<EntityRef>>, source: &dyn DependencySource<EntityRef>) -> usize {
        if changes.is_empty() {
            return 0;
        }
        self.bridge.on_changes(changes, source)
    }

    pub fn invalidate_all(&self) {
        self.db().invalidate_all();
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.db().stats()
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(true)
    }
}
