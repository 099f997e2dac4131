//! Integration tests for the memo database and invalidation bridge

use provisio_incremental::{Change, DependencySource, InvalidationBridge, MemoDb, Slot};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Parent -> children edges
#[derive(Default)]
struct Graph {
    children: HashMap<String, Vec<String>>,
}

impl Graph {
    fn edge(mut self, parent: &str, child: &str) -> Self {
        self.children
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
        self
    }
}

impl DependencySource<String> for Graph {
    fn dependents(&self, key: &String) -> Vec<String> {
        self.children.get(key).cloned().unwrap_or_default()
    }
}

fn key(s: &str) -> String {
    s.to_string()
}

#[test]
fn test_recompute_after_invalidation() {
    let db = Arc::new(MemoDb::<String, String>::new(true));
    let bridge = InvalidationBridge::new(db.clone());
    let graph = Graph::default().edge("distro", "profile").edge("profile", "system");

    let computes = AtomicUsize::new(0);
    let resolve = |k: &str, v: &str| {
        db.get_or_compute(Slot::Resolved, &key(k), || {
            computes.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(v.to_string())
        })
        .unwrap()
    };

    assert_eq!(resolve("system", "old"), "old");
    assert_eq!(resolve("system", "ignored"), "old");
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    bridge.on_change(Change::Modified(key("distro")), &graph);

    assert_eq!(resolve("system", "new"), "new");
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_removed_key_clears_both_slots() {
    let db = Arc::new(MemoDb::<String, u32>::new(true));
    let bridge = InvalidationBridge::new(db.clone());

    for slot in Slot::ALL {
        db.get_or_compute(slot, &key("repo"), || Ok::<_, Infallible>(1)).unwrap();
    }

    bridge.on_change(Change::Removed(key("repo")), &Graph::default());

    assert!(!db.is_cached(Slot::Own, &key("repo")));
    assert!(!db.is_cached(Slot::Resolved, &key("repo")));
}

#[test]
fn test_batch_with_global_clears_everything() {
    let db = Arc::new(MemoDb::<String, u32>::new(true));
    let bridge = InvalidationBridge::new(db.clone());

    db.get_or_compute(Slot::Own, &key("a"), || Ok::<_, Infallible>(1)).unwrap();
    db.get_or_compute(Slot::Own, &key("b"), || Ok::<_, Infallible>(2)).unwrap();

    bridge.on_changes(vec![Change::Modified(key("a")), Change::Global], &Graph::default());

    assert_eq!(db.len(Slot::Own), 0);
}

#[test]
fn test_concurrent_readers_see_consistent_values() {
    let db = Arc::new(MemoDb::<String, u64>::new(true));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = db.clone();
            thread::spawn(move || {
                (0..100u64)
                    .map(|i| {
                        db.get_or_compute(Slot::Resolved, &i.to_string(), || {
                            Ok::<_, Infallible>(i * 2)
                        })
                        .unwrap()
                    })
                    .sum::<u64>()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), (0..100u64).map(|i| i * 2).sum::<u64>());
    }
    assert_eq!(db.len(Slot::Resolved), 100);
}

#[test]
fn test_metrics_track_hits_and_invalidations() {
    let db = Arc::new(MemoDb::<String, u32>::new(true));
    let bridge = InvalidationBridge::new(db.clone());
    let graph = Graph::default().edge("a", "b");

    db.get_or_compute(Slot::Resolved, &key("a"), || Ok::<_, Infallible>(1)).unwrap();
    db.get_or_compute(Slot::Resolved, &key("b"), || Ok::<_, Infallible>(1)).unwrap();
    db.get_or_compute(Slot::Resolved, &key("b"), || Ok::<_, Infallible>(1)).unwrap();

    bridge.on_change(Change::Modified(key("a")), &graph);

    let stats = db.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.invalidations, 2);
}
