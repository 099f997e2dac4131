//! Memo tables
//!
//! A memo table caches one computed value per key. Entries are cleared
//! eagerly on invalidation and repopulated lazily on the next read.

use crate::revision::Revision;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;

/// Which memo slot of a key a value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The key's own data merged onto the global defaults only
    Own,
    /// The full resolution through every ancestor
    Resolved,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Own, Slot::Resolved];
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Own => write!(f, "own"),
            Slot::Resolved => write!(f, "resolved"),
        }
    }
}

/// A memoized value
#[derive(Debug, Clone)]
pub struct MemoEntry<V> {
    /// The cached value
    pub value: V,

    /// Revision the value was computed at
    pub computed_at: Revision,
}

impl<V> MemoEntry<V> {
    pub fn new(value: V, computed_at: Revision) -> Self {
        MemoEntry { value, computed_at }
    }
}

/// Memoization table for one slot
pub struct MemoTable<K, V> {
    entries: DashMap<K, MemoEntry<V>>,
    slot: Slot,
}

impl<K, V> MemoTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(slot: Slot) -> Self {
        MemoTable {
            entries: DashMap::new(),
            slot,
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Get a cached value
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Get the full memo entry
    pub fn get_entry(&self, key: &K) -> Option<MemoEntry<V>> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    /// Insert unconditionally
    pub fn insert(&self, key: K, value: V, computed_at: Revision) -> Option<MemoEntry<V>> {
        self.entries.insert(key, MemoEntry::new(value, computed_at))
    }

    /// Insert only if `is_current` still holds while the key's shard is locked.
    ///
    /// Invalidators bump the revision before clearing, so a value computed
    /// against a stale revision is dropped here rather than cached.
    pub fn insert_if(&self, key: K, value: V, computed_at: Revision, is_current: impl Fn() -> bool) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if !is_current() {
                    return false;
                }
                occupied.insert(MemoEntry::new(value, computed_at));
                true
            }
            Entry::Vacant(vacant) => {
                if !is_current() {
                    return false;
                }
                vacant.insert(MemoEntry::new(value, computed_at));
                true
            }
        }
    }

    /// Invalidate an entry (remove it)
    pub fn invalidate(&self, key: &K) -> Option<MemoEntry<V>> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys currently cached
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<K: Hash + Eq, V> fmt::Debug for MemoTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoTable")
            .field("slot", &self.slot)
            .field("entries", &self.entries.len())
            .finish()
    }
}
