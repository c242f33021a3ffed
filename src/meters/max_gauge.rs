use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use super::atomics::AtomicF64;
use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::refs;
use crate::measurement::Measurement;

/// Gauge that keeps the maximum value seen since the last snapshot.
pub struct MaxGauge {
    id: Id,
    last_updated: AtomicI64,
    value: AtomicF64,
    max_id: OnceLock<Arc<Id>>,
}

impl MaxGauge {
    /// Create an empty max gauge.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            last_updated: AtomicI64::new(clock::unix_nanos()),
            value: AtomicF64::new(f64::MIN),
            max_id: OnceLock::new(),
        }
    }

    /// Record a value; only the maximum survives until the next snapshot.
    pub fn update(&self, value: f64) {
        self.last_updated
            .store(clock::unix_nanos(), Ordering::Relaxed);
        self.value.fetch_max(value);
    }

    /// Synonym for [`MaxGauge::update`], for symmetry with [`super::Gauge`].
    pub fn set(&self, value: f64) {
        self.update(value);
    }

    /// The maximum seen since the last snapshot (NaN when empty).
    #[must_use]
    pub fn get(&self) -> f64 {
        let v = self.value.load();
        if v == f64::MIN {
            f64::NAN
        } else {
            v
        }
    }
}

impl Meter for MaxGauge {
    fn meter_id(&self) -> &Id {
        &self.id
    }

    fn updated(&self) -> i64 {
        self.last_updated.load(Ordering::Relaxed)
    }

    fn measure(&self, results: &mut Vec<Measurement>) {
        let value = self.value.swap(f64::MIN);
        if value == f64::MIN {
            return;
        }
        let id = self
            .max_id
            .get_or_init(|| Arc::new(self.id.with_stat(refs().max)));
        results.push(Measurement::new(id.clone(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::{MaxGauge, Meter};
    use crate::id::Id;
    use crate::intern::intern;
    use crate::tags::Tags;

    fn measure(g: &MaxGauge) -> Vec<crate::measurement::Measurement> {
        let mut out = Vec::new();
        g.measure(&mut out);
        out
    }

    #[test]
    fn emits_maximum_of_sequence() {
        let g = MaxGauge::new(Id::of("m", Tags::new()));
        for v in [3.0, 9.5, 1.0, 7.0] {
            g.update(v);
        }
        let ms = measure(&g);
        assert_eq!(ms.len(), 1);
        assert!((ms[0].value - 9.5).abs() < f64::EPSILON);
        assert_eq!(ms[0].id.tags().at(intern("statistic")), Some(intern("max")));
        // nothing left after the snapshot
        assert!(measure(&g).is_empty());
    }

    #[test]
    fn negative_values_are_valid_maxima() {
        let g = MaxGauge::new(Id::of("m", Tags::new()));
        g.update(-10.0);
        g.update(-2.5);
        let ms = measure(&g);
        assert!((ms[0].value + 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn get_is_nan_when_empty() {
        let g = MaxGauge::new(Id::of("m", Tags::new()));
        assert!(g.get().is_nan());
        g.set(4.0);
        assert!((g.get() - 4.0).abs() < f64::EPSILON);
    }
}
