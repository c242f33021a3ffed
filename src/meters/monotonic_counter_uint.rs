use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::refs;
use crate::measurement::Measurement;

// deltas beyond 2^63 are treated as unexpected overflows
const OVERFLOW: f64 = 9.223_372e18;

/// Monotonic counter over an unsigned 64-bit source, with wrap-around
/// handling: when the current value is below the previous one, the delta is
/// computed modulo 2^64. Deltas that still exceed 2^63 are reported as zero.
pub struct MonotonicCounterUint {
    id: Id,
    last_updated: AtomicI64,
    init: AtomicBool,
    value: AtomicU64,
    prev_value: AtomicU64,
    count_id: OnceLock<Arc<Id>>,
}

impl MonotonicCounterUint {
    /// Create an uninitialized monotonic counter.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            last_updated: AtomicI64::new(clock::unix_nanos()),
            init: AtomicBool::new(false),
            value: AtomicU64::new(0),
            prev_value: AtomicU64::new(0),
            count_id: OnceLock::new(),
        }
    }

    /// Record the current value of the source.
    pub fn set(&self, amount: u64) {
        self.last_updated
            .store(clock::unix_nanos(), Ordering::Relaxed);
        self.value.store(amount, Ordering::Relaxed);
    }

    /// Change since the previous snapshot; NaN until initialized.
    #[must_use]
    pub fn delta(&self) -> f64 {
        if !self.init.load(Ordering::Relaxed) {
            return f64::NAN;
        }
        let prev = self.prev_value.load(Ordering::Relaxed);
        let curr = self.value.load(Ordering::Relaxed);
        if curr < prev {
            (u64::MAX - prev + curr + 1) as f64
        } else {
            (curr - prev) as f64
        }
    }
}

impl Meter for MonotonicCounterUint {
    fn meter_id(&self) -> &Id {
        &self.id
    }

    fn updated(&self) -> i64 {
        self.last_updated.load(Ordering::Relaxed)
    }

    fn measure(&self, results: &mut Vec<Measurement>) {
        let delta = self.delta();
        self.prev_value
            .store(self.value.load(Ordering::Relaxed), Ordering::Relaxed);
        self.init.store(true, Ordering::Relaxed);

        if delta > 0.0 {
            let id = self
                .count_id
                .get_or_init(|| Arc::new(self.id.with_default_stat(refs().count)));
            let reported = if delta > OVERFLOW { 0.0 } else { delta };
            results.push(Measurement::new(id.clone(), reported));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Meter, MonotonicCounterUint};
    use crate::id::Id;
    use crate::tags::Tags;

    fn measure(c: &MonotonicCounterUint) -> Vec<crate::measurement::Measurement> {
        let mut out = Vec::new();
        c.measure(&mut out);
        out
    }

    #[test]
    fn plain_delta() {
        let c = MonotonicCounterUint::new(Id::of("c", Tags::new()));
        c.set(10);
        assert!(measure(&c).is_empty());
        c.set(25);
        let ms = measure(&c);
        assert!((ms[0].value - 15.0).abs() < 1e-9);
    }

    #[test]
    fn wraparound_at_u64_max() {
        let c = MonotonicCounterUint::new(Id::of("c", Tags::new()));
        c.set(u64::MAX - 2);
        let _ = measure(&c);
        c.set(2);
        let ms = measure(&c);
        // MAX-2 -> MAX (2), wrap to 0 (1), then to 2 (2): delta 5
        assert!((ms[0].value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn huge_delta_reports_zero() {
        let c = MonotonicCounterUint::new(Id::of("c", Tags::new()));
        c.set(0);
        let _ = measure(&c);
        c.set(u64::MAX - 1);
        let ms = measure(&c);
        assert_eq!(ms.len(), 1);
        assert!(ms[0].value.abs() < f64::EPSILON);
    }
}
