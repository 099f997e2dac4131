//! Two-slot memo database
//!
//! Holds the `own` and `resolved` memo tables, the revision clock that
//! guards against caching values computed across an invalidation, and
//! the global enable switch.

use crate::memo::{MemoTable, Slot};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::revision::{Revision, RevisionClock};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Memoization database keyed by `K`
pub struct MemoDb<K, V> {
    own: MemoTable<K, V>,
    resolved: MemoTable<K, V>,

    /// Bumped by every invalidation
    clock: RevisionClock,

    /// When false, reads always recompute and nothing is stored
    enabled: AtomicBool,

    metrics: CacheMetrics,
}

impl<K, V> MemoDb<K, V>
where
    K: Hash + Eq + Clone + fmt::Display,
    V: Clone,
{
    pub fn new(enabled: bool) -> Self {
        MemoDb {
            own: MemoTable::new(Slot::Own),
            resolved: MemoTable::new(Slot::Resolved),
            clock: RevisionClock::new(),
            enabled: AtomicBool::new(enabled),
            metrics: CacheMetrics::new(),
        }
    }

    fn table(&self, slot: Slot) -> &MemoTable<K, V> {
        match slot {
            Slot::Own => &self.own,
            Slot::Resolved => &self.resolved,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Switch memoization on or off. Switching off drops every entry.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was && !enabled {
            self.invalidate_all();
        }
        tracing::debug!(enabled, "resolution cache mode changed");
    }

    pub fn revision(&self) -> Revision {
        self.clock.current()
    }

    /// Cached value, if memoization is on and the slot is populated
    pub fn get(&self, slot: Slot, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let value = self.table(slot).get(key);
        if value.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        value
    }

    /// Serve from the slot, or compute and populate it.
    ///
    /// Concurrent misses may compute the same value more than once; the
    /// computation must be pure. A value whose computation overlapped an
    /// invalidation is returned but not stored.
    pub fn get_or_compute<E>(
        &self,
        slot: Slot,
        key: &K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(slot, key) {
            return Ok(value);
        }

        let started_at = self.revision();
        let start = Instant::now();
        let value = compute()?;
        self.metrics.record_compute(start.elapsed());

        if self.is_enabled() {
            let stored = self.table(slot).insert_if(key.clone(), value.clone(), started_at, || {
                self.clock.current() == started_at && self.is_enabled()
            });
            if !stored {
                self.metrics.record_stale_discard();
                tracing::debug!(key = %key, slot = %slot, "discarding value computed across an invalidation");
            }
        }

        Ok(value)
    }

    /// Clear the given slots of one key
    pub fn invalidate(&self, key: &K, slots: &[Slot]) {
        self.clock.bump();
        let mut cleared = 0;
        for slot in slots {
            if self.table(*slot).invalidate(key).is_some() {
                cleared += 1;
            }
        }
        self.metrics.record_invalidations(cleared);
    }

    /// Clear every slot of every key
    pub fn invalidate_all(&self) {
        self.clock.bump();
        let cleared = self.own.len() + self.resolved.len();
        self.own.clear();
        self.resolved.clear();
        self.metrics.record_invalidations(cleared as u64);
    }

    /// Whether the slot currently holds a value (no metrics side effects)
    pub fn is_cached(&self, slot: Slot, key: &K) -> bool {
        self.table(slot).contains(key)
    }

    pub fn len(&self, slot: Slot) -> usize {
        self.table(slot).len()
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl<K: Hash + Eq, V> fmt::Debug for MemoDb<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoDb")
            .field("own", &self.own)
            .field("resolved", &self.resolved)
            .field("revision", &self.clock.current())
            .field("enabled", &self.enabled.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicU32;

    fn compute_counting(counter: &AtomicU32, value: u32) -> Result<u32, Infallible> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[test]
    fn test_memoization() {
        let db = MemoDb::<String, u32>::new(true);
        let calls = AtomicU32::new(0);
        let key = "a".to_string();

        assert_eq!(db.get_or_compute(Slot::Resolved, &key, || compute_counting(&calls, 6)), Ok(6));
        assert_eq!(db.get_or_compute(Slot::Resolved, &key, || compute_counting(&calls, 7)), Ok(6));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = db.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_slots_are_independent() {
        let db = MemoDb::<String, u32>::new(true);
        let key = "a".to_string();

        db.get_or_compute(Slot::Own, &key, || Ok::<_, Infallible>(1)).unwrap();
        db.get_or_compute(Slot::Resolved, &key, || Ok::<_, Infallible>(2)).unwrap();

        db.invalidate(&key, &[Slot::Resolved]);
        assert!(db.is_cached(Slot::Own, &key));
        assert!(!db.is_cached(Slot::Resolved, &key));
    }

    #[test]
    fn test_disabled_never_stores() {
        let db = MemoDb::<String, u32>::new(false);
        let calls = AtomicU32::new(0);
        let key = "a".to_string();

        db.get_or_compute(Slot::Own, &key, || compute_counting(&calls, 1)).unwrap();
        db.get_or_compute(Slot::Own, &key, || compute_counting(&calls, 1)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(db.len(Slot::Own), 0);
    }

    #[test]
    fn test_debug_reports_entry_counts() {
        let db = MemoDb::<String, u32>::new(true);
        db.get_or_compute(Slot::Resolved, &"a".to_string(), || Ok::<_, Infallible>(1))
            .unwrap();

        let rendered = format!("{:?}", db);

        assert!(rendered.contains("slot: Own, entries: 0"));
        assert!(rendered.contains("slot: Resolved, entries: 1"));
    }

    #[test]
    fn test_disabling_clears() {
        let db = MemoDb::<String, u32>::new(true);
        let key = "a".to_string();
        db.get_or_compute(Slot::Own, &key, || Ok::<_, Infallible>(1)).unwrap();

        db.set_enabled(false);
        assert_eq!(db.len(Slot::Own), 0);
        assert_eq!(db.get(Slot::Own, &key), None);
    }

    #[test]
    fn test_invalidation_during_compute_is_not_cached() {
        let db = MemoDb::<String, u32>::new(true);
        let key = "a".to_string();

        let value = db
            .get_or_compute(Slot::Resolved, &key, || {
                // a concurrent writer invalidating mid-computation
                db.invalidate(&key, &Slot::ALL);
                Ok::<_, Infallible>(5)
            })
            .unwrap();

        assert_eq!(value, 5);
        assert!(!db.is_cached(Slot::Resolved, &key));
        assert_eq!(db.stats().stale_discards, 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let db = MemoDb::<String, u32>::new(true);
        let key = "a".to_string();

        let result: Result<u32, &str> = db.get_or_compute(Slot::Own, &key, || Err("boom"));
        assert_eq!(result, Err("boom"));
        assert!(!db.is_cached(Slot::Own, &key));
    }
}
