use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use super::atomics::AtomicF64;
use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::{refs, StrRef};
use crate::measurement::Measurement;

/// The four statistic ids a distribution-shaped meter reports under, derived
/// once from the meter id.
pub(crate) struct DistStats {
    pub count: Arc<Id>,
    pub total: Arc<Id>,
    pub total_sq: Arc<Id>,
    pub max: Arc<Id>,
}

impl DistStats {
    pub fn new(id: &Id, total_stat: StrRef) -> Self {
        Self {
            count: Arc::new(id.with_stat(refs().count)),
            total: Arc::new(id.with_stat(total_stat)),
            total_sq: Arc::new(id.with_stat(refs().total_of_squares)),
            max: Arc::new(id.with_stat(refs().max)),
        }
    }
}

/// Aggregates a stream of non-negative amounts into count, total,
/// total-of-squares, and max.
pub struct DistributionSummary {
    id: Id,
    last_updated: AtomicI64,
    count: AtomicU64,
    total: AtomicF64,
    total_sq: AtomicF64,
    max: AtomicF64,
    stats: OnceLock<DistStats>,
}

impl DistributionSummary {
    /// Create an empty distribution summary.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            last_updated: AtomicI64::new(clock::unix_nanos()),
            count: AtomicU64::new(0),
            total: AtomicF64::new(0.0),
            total_sq: AtomicF64::new(0.0),
            max: AtomicF64::new(0.0),
            stats: OnceLock::new(),
        }
    }

    /// Record an amount. Negative amounts are silently ignored.
    pub fn record(&self, amount: f64) {
        self.last_updated
            .store(clock::unix_nanos(), Ordering::Relaxed);
        if amount >= 0.0 {
            self.count.fetch_add(1, Ordering::Relaxed);
            self.total.add(amount);
            self.total_sq.add(amount * amount);
            self.max.fetch_max(amount);
        }
    }

    /// Number of recorded amounts since the last snapshot.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of recorded amounts since the last snapshot.
    #[must_use]
    pub fn total_amount(&self) -> f64 {
        self.total.load()
    }
}

impl Meter for DistributionSummary {
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
            .get_or_init(|| DistStats::new(&self.id, refs().total_amount));
        let total = self.total.swap(0.0);
        let total_sq = self.total_sq.swap(0.0);
        let max = self.max.swap(0.0);
        results.push(Measurement::new(stats.count.clone(), count as f64));
        results.push(Measurement::new(stats.total.clone(), total));
        results.push(Measurement::new(stats.total_sq.clone(), total_sq));
        results.push(Measurement::new(stats.max.clone(), max));
    }
}
