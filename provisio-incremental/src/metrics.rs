//! Cache metrics
//!
//! Instrumentation for tracking cache effectiveness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one memo database
#[derive(Debug)]
pub struct CacheMetrics {
    /// Number of cache hits
    pub hit_count: AtomicU64,

    /// Number of cache misses
    pub miss_count: AtomicU64,

    /// Number of recomputations (misses plus bypassed reads)
    pub compute_count: AtomicU64,

    /// Number of computed values discarded because an invalidation raced them
    pub stale_discard_count: AtomicU64,

    /// Number of slot invalidations
    pub invalidation_count: AtomicU64,

    /// Total time spent computing (nanoseconds)
    pub total_compute_time_ns: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        CacheMetrics {
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            compute_count: AtomicU64::new(0),
            stale_discard_count: AtomicU64::new(0),
            invalidation_count: AtomicU64::new(0),
            total_compute_time_ns: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_discard(&self) {
        self.stale_discard_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidation_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_compute(&self, duration: Duration) {
        self.compute_count.fetch_add(1, Ordering::Relaxed);
        self.total_compute_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.hit_count.store(0, Ordering::Relaxed);
        self.miss_count.store(0, Ordering::Relaxed);
        self.compute_count.store(0, Ordering::Relaxed);
        self.stale_discard_count.store(0, Ordering::Relaxed);
        self.invalidation_count.store(0, Ordering::Relaxed);
        self.total_compute_time_ns.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            computes: self.compute_count.load(Ordering::Relaxed),
            stale_discards: self.stale_discard_count.load(Ordering::Relaxed),
            invalidations: self.invalidation_count.load(Ordering::Relaxed),
            total_time_ns: self.total_compute_time_ns.load(Ordering::Relaxed),
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of cache metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub computes: u64,
    pub stale_discards: u64,
    pub invalidations: u64,
    pub total_time_ns: u64,
}

impl MetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn avg_compute_time(&self) -> Duration {
        if self.computes == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_time_ns / self.computes)
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Resolution cache:")?;
        writeln!(
            f,
            "  Hits: {} | Misses: {} | Hit Rate: {:.1}%",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Computes: {} | Stale discards: {} | Invalidations: {}",
            self.computes, self.stale_discards, self.invalidations
        )?;
        writeln!(
            f,
            "  Avg Time: {:.3}ms",
            self.avg_compute_time().as_secs_f64() * 1000.0
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_basic() {
        let metrics = CacheMetrics::new();

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        assert_eq!(metrics.hit_count.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.miss_count.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.hit_rate(), 2.0 / 3.0);
    }

    #[test]
    fn test_metrics_compute_time() {
        let metrics = CacheMetrics::new();

        metrics.record_compute(Duration::from_millis(10));
        metrics.record_compute(Duration::from_millis(20));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.computes, 2);
        assert_eq!(snapshot.avg_compute_time(), Duration::from_millis(15));
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = CacheMetrics::new();

        metrics.record_hit();
        metrics.record_invalidations(3);
        metrics.reset();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
