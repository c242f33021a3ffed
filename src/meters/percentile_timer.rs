use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::percentile_buckets::{index_of, timer_tag, LENGTH};
use super::{Counter, Timer};
use crate::id::Id;
use crate::intern::refs;
use crate::registry::Registry;

/// A [`Timer`] composed with per-bucket counters so the aggregator can
/// approximate percentiles. Recording updates the base timer and increments
/// the counter for the bucket the clamped duration falls into; bucket
/// counters are created lazily on first hit and reused.
pub struct PercentileTimer {
    registry: Arc<Registry>,
    id: Id,
    min_nanos: i64,
    max_nanos: i64,
    timer: Arc<Timer>,
    counters: [OnceLock<Arc<Counter>>; LENGTH],
}

impl PercentileTimer {
    /// Create a percentile timer clamping records into `[min, max]`.
    #[must_use]
    pub fn new(registry: &Arc<Registry>, id: Id, min: Duration, max: Duration) -> Self {
        let timer = registry.get_timer(id.clone());
        Self {
            registry: registry.clone(),
            id,
            min_nanos: min.as_nanos() as i64,
            max_nanos: max.as_nanos() as i64,
            timer,
            counters: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// Record an elapsed time in nanoseconds.
    pub fn record_nanos(&self, nanos: i64) {
        self.timer.record_nanos(nanos);
        let restricted = nanos.clamp(self.min_nanos, self.max_nanos);
        self.counter_at(index_of(restricted)).increment();
    }

    /// Record an elapsed time.
    pub fn record(&self, amount: Duration) {
        self.record_nanos(amount.as_nanos() as i64);
    }

    /// The id this meter was created under.
    #[must_use]
    pub fn meter_id(&self) -> &Id {
        &self.id
    }

    /// Number of recorded durations since the last snapshot.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.timer.count()
    }

    /// Sum of recorded durations in nanoseconds since the last snapshot.
    #[must_use]
    pub fn total_time(&self) -> i64 {
        self.timer.total_time()
    }

    fn counter_at(&self, index: usize) -> &Arc<Counter> {
        self.counters[index].get_or_init(|| {
            let counter_id = self
                .id
                .with_tag(refs().statistic, refs().percentile)
                .with_tag(refs().percentile, timer_tag(index));
            self.registry.get_counter(counter_id)
        })
    }
}
