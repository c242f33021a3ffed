use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::refs;
use crate::measurement::Measurement;

#[derive(Default)]
struct Sample {
    init: bool,
    value: u64,
    prev_value: u64,
    ts: u64,
    prev_ts: u64,
}

/// Monotonic counter sampled with an explicit timestamp; the reported
/// quantity is a per-second rate between the two most recent points.
/// Out-of-order points are ignored.
pub struct MonotonicSampled {
    id: Id,
    last_updated: AtomicI64,
    sample: Mutex<Sample>,
    count_id: OnceLock<Arc<Id>>,
}

impl MonotonicSampled {
    /// Create an uninitialized sampled counter.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            last_updated: AtomicI64::new(clock::unix_nanos()),
            sample: Mutex::new(Sample::default()),
            count_id: OnceLock::new(),
        }
    }

    /// Record a `(value, timestamp)` observation. Timestamps are nanoseconds
    /// since the epoch; points older than the stored one are dropped.
    pub fn set(&self, amount: u64, ts_nanos: u64) {
        self.last_updated
            .store(clock::unix_nanos(), Ordering::Relaxed);
        let mut sample = self.sample.lock();

        if ts_nanos < sample.ts {
            return;
        }
        if sample.init {
            sample.prev_value = sample.value;
            sample.prev_ts = sample.ts;
        }
        sample.value = amount;
        sample.ts = ts_nanos;
    }

    /// Rate between the previous and current point, per second. NaN until
    /// two points have been seen.
    #[must_use]
    pub fn sampled_rate(&self) -> f64 {
        let sample = self.sample.lock();
        if !sample.init {
            return f64::NAN;
        }
        let delta_t = (sample.ts - sample.prev_ts) as f64 / 1e9;
        let delta = if sample.value < sample.prev_value {
            (u64::MAX - sample.prev_value + sample.value + 1) as f64
        } else {
            (sample.value - sample.prev_value) as f64
        };
        delta / delta_t
    }
}

impl Meter for MonotonicSampled {
    fn meter_id(&self) -> &Id {
        &self.id
    }

    fn updated(&self) -> i64 {
        self.last_updated.load(Ordering::Relaxed)
    }

    fn measure(&self, results: &mut Vec<Measurement>) {
        let rate = self.sampled_rate();
        {
            let mut sample = self.sample.lock();
            sample.prev_value = sample.value;
            sample.prev_ts = sample.ts;
            sample.init = true;
        }
        if rate > 0.0 {
            let id = self
                .count_id
                .get_or_init(|| Arc::new(self.id.with_stat(refs().count)));
            results.push(Measurement::new(id.clone(), rate));
        }
    }
}
