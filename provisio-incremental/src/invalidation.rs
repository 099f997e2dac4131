//! Invalidation bridge
//!
//! Translates store mutations into memo invalidations. Invalidation is
//! push-based (slots are cleared immediately); recomputation is pull-based
//! and happens on the next read.

use crate::db::MemoDb;
use crate::memo::Slot;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// A change that affects memoized values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<K> {
    /// The key's own data changed; its dependents inherit the change
    Modified(K),

    /// The key was removed from the store
    Removed(K),

    /// The key's position in the dependency graph changed (reparented,
    /// referenced entity renamed or deleted)
    Restructured(K),

    /// Global inputs changed; everything is stale
    Global,
}

/// Source of the dependency graph used to find affected keys
pub trait DependencySource<K> {
    /// Keys whose resolution directly includes `key`
    fn dependents(&self, key: &K) -> Vec<K>;
}

/// Bridge between store changes and memo invalidation
pub struct InvalidationBridge<K, V> {
    db: Arc<MemoDb<K, V>>,
}

impl<K, V> InvalidationBridge<K, V>
where
    K: Hash + Eq + Clone + fmt::Display,
    V: Clone,
{
    pub fn new(db: Arc<MemoDb<K, V>>) -> Self {
        InvalidationBridge { db }
    }

    pub fn db(&self) -> &Arc<MemoDb<K, V>> {
        &self.db
    }

    /// Handle one change, returning how many keys were touched
    pub fn on_change(&self, change: Change<K>, source: &dyn DependencySource<K>) -> usize {
        match change {
            Change::Global => {
                self.db.invalidate_all();
                tracing::debug!("invalidated every resolution");
                0
            }
            Change::Modified(key) | Change::Restructured(key) | Change::Removed(key) => {
                self.db.invalidate(&key, &Slot::ALL);
                let descendants = self.descendants(&key, source);
                for descendant in &descendants {
                    self.db.invalidate(descendant, &[Slot::Resolved]);
                }
                tracing::debug!(key = %key, descendants = descendants.len(), "invalidated subtree");
                descendants.len() + 1
            }
        }
    }

    /// Process a batch of changes, collapsing duplicates
    pub fn on_changes(&self, changes: Vec<Change<K>>, source: &dyn DependencySource<K>) -> usize {
        if changes.iter().any(|c| matches!(c, Change::Global)) {
            return self.on_change(Change::Global, source);
        }

        let mut seen = HashSet::new();
        let mut touched = 0;
        for change in changes {
            let key = match &change {
                Change::Modified(k) | Change::Restructured(k) | Change::Removed(k) => k.clone(),
                Change::Global => continue,
            };
            if seen.insert(key) {
                touched += self.on_change(change, source);
            }
        }
        touched
    }

    /// Transitive dependents of `key`, breadth first, each reported once
    pub fn descendants(&self, key: &K, source: &dyn DependencySource<K>) -> Vec<K> {
        let mut visited = HashSet::new();
        visited.insert(key.clone());

        let mut queue: VecDeque<K> = source.dependents(key).into();
        let mut result = Vec::new();
        while let Some(next) = queue.pop_front() {
            if !visited.insert(next.clone()) {
                continue;
            }
            queue.extend(source.dependents(&next));
            result.push(next);
        }
        result
    }
}

impl<K, V> fmt::Debug for InvalidationBridge<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBridge").finish_non_exhaustive()
    }
}
