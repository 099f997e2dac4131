//! Benchmarks for the memo database

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use provisio_incremental::{Change, DependencySource, InvalidationBridge, MemoDb, Slot};
use std::convert::Infallible;
use std::sync::Arc;

/// A chain 0 -> 1 -> ... -> n-1
struct Chain(usize);

impl DependencySource<usize> for Chain {
    fn dependents(&self, key: &usize) -> Vec<usize> {
        if key + 1 < self.0 {
            vec![key + 1]
        } else {
            Vec::new()
        }
    }
}

fn bench_hot_reads(c: &mut Criterion) {
    let db = MemoDb::<usize, String>::new(true);
    for i in 0..1_000 {
        db.get_or_compute(Slot::Resolved, &i, || Ok::<_, Infallible>(i.to_string()))
            .unwrap();
    }

    c.bench_function("memo_get_hot", |b| {
        b.iter(|| {
            let value = db.get_or_compute(Slot::Resolved, black_box(&500), || {
                Ok::<_, Infallible>(String::new())
            });
            black_box(value)
        })
    });
}

fn bench_cold_compute(c: &mut Criterion) {
    let db = MemoDb::<usize, String>::new(true);

    c.bench_function("memo_get_cold", |b| {
        b.iter(|| {
            db.invalidate_all();
            let value = db.get_or_compute(Slot::Own, black_box(&1), || {
                Ok::<_, Infallible>("value".to_string())
            });
            black_box(value)
        })
    });
}

fn bench_subtree_invalidation(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidate_chain");

    for depth in [10usize, 100, 1_000] {
        let db = Arc::new(MemoDb::<usize, u64>::new(true));
        let bridge = InvalidationBridge::new(db.clone());
        let chain = Chain(depth);

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                for i in 0..depth {
                    db.get_or_compute(Slot::Resolved, &i, || Ok::<_, Infallible>(i as u64))
                        .unwrap();
                }
                black_box(bridge.on_change(Change::Modified(0), &chain))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_hot_reads,
    bench_cold_compute,
    bench_subtree_invalidation
);
criterion_main!(benches);
