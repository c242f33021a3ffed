use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use super::atomics::AtomicF64;
use super::dist_summary::DistStats;
use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::refs;
use crate::measurement::Measurement;

/// Aggregates durations. State is kept in nanoseconds and reported in
/// seconds. Negative durations are rejected.
pub struct Timer {
    id: Id,
    last_updated: AtomicI64,
    count: AtomicU64,
    total: AtomicI64,
    total_sq: AtomicF64,
    max: AtomicI64,
    stats: OnceLock<DistStats>,
}

impl Timer {
    /// Create an empty timer.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            last_updated: AtomicI64::new(clock::unix_nanos()),
            count: AtomicU64::new(0),
            total: AtomicI64::new(0),
            total_sq: AtomicF64::new(0.0),
            max: AtomicI64::new(0),
            stats: OnceLock::new(),
        }
    }

    /// Record an elapsed time in nanoseconds. Negative values are ignored.
    pub fn record_nanos(&self, nanos: i64) {
        self.last_updated
            .store(clock::unix_nanos(), Ordering::Relaxed);
        if nanos >= 0 {
            self.count.fetch_add(1, Ordering::Relaxed);
            self.total.fetch_add(nanos, Ordering::Relaxed);
            self.total_sq.add(nanos as f64 * nanos as f64);
            self.max.fetch_max(nanos, Ordering::Relaxed);
        }
    }

    /// Record an elapsed time.
    pub fn record(&self, amount: Duration) {
        self.record_nanos(amount.as_nanos() as i64);
    }

    /// Number of recorded durations since the last snapshot.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of recorded durations in nanoseconds since the last snapshot.
    #[must_use]
    pub fn total_time(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Meter for Timer {
    fn meter_id(&self) -> &Id {
        &self.id
    }

    fn updated(&self) -> i64 {
        self.last_updated.load(Ordering::Relaxed)
    }

    fn measure(&self, results: &mut Vec<Measurement>) {
        let count = self.count.swap(0, Ordering::Relaxed);
        if count == 0 {
            return;
        }
        let stats = self
            .stats
            .get_or_init(|| DistStats::new(&self.id, refs().total_time));
        let total_secs = self.total.swap(0, Ordering::Relaxed) as f64 / 1e9;
        let total_sq_secs = self.total_sq.swap(0.0) / 1e18;
        let max_secs = self.max.swap(0, Ordering::Relaxed) as f64 / 1e9;
        results.push(Measurement::new(stats.count.clone(), count as f64));
        results.push(Measurement::new(stats.total.clone(), total_secs));
        results.push(Measurement::new(stats.total_sq.clone(), total_sq_secs));
        results.push(Measurement::new(stats.max.clone(), max_secs));
    }
}
