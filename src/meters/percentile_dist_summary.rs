use std::sync::{Arc, OnceLock};

use super::percentile_buckets::{dist_tag, index_of, LENGTH};
use super::{Counter, DistributionSummary};
use crate::id::Id;
use crate::intern::refs;
use crate::registry::Registry;

/// A [`DistributionSummary`] composed with per-bucket counters, the
/// distribution analogue of [`super::PercentileTimer`].
pub struct PercentileDistributionSummary {
    registry: Arc<Registry>,
    id: Id,
    min: i64,
    max: i64,
    summary: Arc<DistributionSummary>,
    counters: [OnceLock<Arc<Counter>>; LENGTH],
}

impl PercentileDistributionSummary {
    /// Create a percentile distribution summary clamping records into
    /// `[min, max]`.
    #[must_use]
    pub fn new(registry: &Arc<Registry>, id: Id, min: i64, max: i64) -> Self {
        let summary = registry.get_dist_summary(id.clone());
        Self {
            registry: registry.clone(),
            id,
            min,
            max,
            summary,
            counters: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// Record an amount.
    pub fn record(&self, amount: i64) {
        self.summary.record(amount as f64);
        let restricted = amount.clamp(self.min, self.max);
        self.counter_at(index_of(restricted)).increment();
    }

    /// The id this meter was created under.
    #[must_use]
    pub fn meter_id(&self) -> &Id {
        &self.id
    }

    /// Number of recorded amounts since the last snapshot.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.summary.count()
    }

    /// Sum of recorded amounts since the last snapshot.
    #[must_use]
    pub fn total_amount(&self) -> f64 {
        self.summary.total_amount()
    }

    fn counter_at(&self, index: usize) -> &Arc<Counter> {
        self.counters[index].get_or_init(|| {
            let counter_id = self
                .id
                .with_tag(refs().statistic, refs().percentile)
                .with_tag(refs().percentile, dist_tag(index));
            self.registry.get_counter(counter_id)
        })
    }
}
