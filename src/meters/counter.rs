use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use super::atomics::AtomicF64;
use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::refs;
use crate::measurement::Measurement;

/// A rate-of-change counter. Negative deltas are silently ignored.
pub struct Counter {
    id: Id,
    last_updated: AtomicI64,
    count: AtomicF64,
    count_id: OnceLock<Arc<Id>>,
}

impl Counter {
    /// Create a counter with a zero accumulator.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            last_updated: AtomicI64::new(clock::unix_nanos()),
            count: AtomicF64::new(0.0),
            count_id: OnceLock::new(),
        }
    }

    /// Add one.
    pub fn increment(&self) {
        self.add(1.0);
    }

    /// Add `delta` if it is non-negative.
    pub fn add(&self, delta: f64) {
        if delta >= 0.0 {
            self.last_updated
                .store(clock::unix_nanos(), Ordering::Relaxed);
            self.count.add(delta);
        }
    }

    /// The accumulated count since the last snapshot.
    #[must_use]
    pub fn count(&self) -> f64 {
        self.count.load()
    }
}

impl Meter for Counter {
    fn meter_id(&self) -> &Id {
        &self.id
    }

    fn updated(&self) -> i64 {
        self.last_updated.load(Ordering::Relaxed)
    }

    fn measure(&self, results: &mut Vec<Measurement>) {
        let count = self.count.swap(0.0);
        if count > 0.0 {
            let id = self
                .count_id
                .get_or_init(|| Arc::new(self.id.with_default_stat(refs().count)));
            results.push(Measurement::new(id.clone(), count));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Counter, Meter};
    use crate::id::Id;
    use crate::intern::intern;
    use crate::tags::Tags;

    fn measure(c: &Counter) -> Vec<crate::measurement::Measurement> {
        let mut out = Vec::new();
        c.measure(&mut out);
        out
    }

    #[test]
    fn adds_accumulate_until_measured() {
        let c = Counter::new(Id::of("c", Tags::new()));
        c.add(1.0);
        c.add(2.5);
        assert!((c.count() - 3.5).abs() < f64::EPSILON);

        let ms = measure(&c);
        assert_eq!(ms.len(), 1);
        assert!((ms[0].value - 3.5).abs() < f64::EPSILON);
        assert_eq!(
            ms[0].id.tags().at(intern("statistic")),
            Some(intern("count"))
        );

        // reset on measure
        assert!(c.count().abs() < f64::EPSILON);
        assert!(measure(&c).is_empty());
    }

    #[test]
    fn negative_deltas_are_ignored() {
        let c = Counter::new(Id::of("c", Tags::new()));
        c.add(-1.0);
        c.add(f64::NAN);
        assert!(measure(&c).is_empty());
    }

    #[test]
    fn sum_of_measures_equals_sum_of_adds() {
        let c = Counter::new(Id::of("c", Tags::new()));
        let mut total = 0.0;
        let mut published = 0.0;
        for i in 0..100 {
            let x = f64::from(i) * 0.25;
            c.add(x);
            total += x;
            if i % 7 == 0 {
                published += measure(&c).first().map_or(0.0, |m| m.value);
            }
        }
        published += measure(&c).first().map_or(0.0, |m| m.value);
        assert!((published - total).abs() < 1e-9);
    }

    #[test]
    fn existing_statistic_tag_is_kept() {
        let c = Counter::new(Id::of("c", Tags::of(&[("statistic", "percentile")])));
        c.increment();
        let ms = measure(&c);
        assert_eq!(
            ms[0].id.tags().at(intern("statistic")),
            Some(intern("percentile"))
        );
    }
}
