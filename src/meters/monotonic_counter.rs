use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use super::atomics::AtomicF64;
use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::refs;
use crate::measurement::Measurement;

/// Reports the delta of an externally maintained, monotonically increasing
/// value. Nothing is emitted until a second observation establishes a
/// baseline; negative deltas are dropped.
pub struct MonotonicCounter {
    id: Id,
    last_updated: AtomicI64,
    init: AtomicBool,
    value: AtomicF64,
    prev_value: AtomicF64,
    count_id: OnceLock<Arc<Id>>,
}

impl MonotonicCounter {
    /// Create an uninitialized monotonic counter.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            last_updated: AtomicI64::new(clock::unix_nanos()),
            init: AtomicBool::new(false),
            value: AtomicF64::new(0.0),
            prev_value: AtomicF64::new(0.0),
            count_id: OnceLock::new(),
        }
    }

    /// Record the current value of the source.
    pub fn set(&self, amount: f64) {
        self.last_updated
            .store(clock::unix_nanos(), Ordering::Relaxed);
        self.value.store(amount);
    }

    /// Change since the previous snapshot; NaN until initialized.
    #[must_use]
    pub fn delta(&self) -> f64 {
        if !self.init.load(Ordering::Relaxed) {
            return f64::NAN;
        }
        self.value.load() - self.prev_value.load()
    }
}

impl Meter for MonotonicCounter {
    fn meter_id(&self) -> &Id {
        &self.id
    }

    fn updated(&self) -> i64 {
        self.last_updated.load(Ordering::Relaxed)
    }

    fn measure(&self, results: &mut Vec<Measurement>) {
        let delta = self.delta();
        self.prev_value.store(self.value.load());
        self.init.store(true, Ordering::Relaxed);

        if delta > 0.0 {
            let id = self
                .count_id
                .get_or_init(|| Arc::new(self.id.with_default_stat(refs().count)));
            results.push(Measurement::new(id.clone(), delta));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Meter, MonotonicCounter};
    use crate::id::Id;
    use crate::tags::Tags;

    fn measure(c: &MonotonicCounter) -> Vec<crate::measurement::Measurement> {
        let mut out = Vec::new();
        c.measure(&mut out);
        out
    }

    #[test]
    fn no_emission_before_second_set() {
        let c = MonotonicCounter::new(Id::of("c", Tags::new()));
        c.set(42.0);
        assert!(c.delta().is_nan());
        assert!(measure(&c).is_empty());

        c.set(52.0);
        let ms = measure(&c);
        assert_eq!(ms.len(), 1);
        assert!((ms[0].value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn negative_delta_is_dropped() {
        let c = MonotonicCounter::new(Id::of("c", Tags::new()));
        c.set(100.0);
        let _ = measure(&c);
        c.set(90.0);
        assert!(measure(&c).is_empty());
        // the lowered value becomes the new baseline
        c.set(95.0);
        let ms = measure(&c);
        assert!((ms[0].value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn unchanged_value_emits_nothing() {
        let c = MonotonicCounter::new(Id::of("c", Tags::new()));
        c.set(7.0);
        let _ = measure(&c);
        assert!(measure(&c).is_empty());
    }
}
