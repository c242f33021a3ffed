use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::atomics::AtomicF64;
use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::refs;
use crate::measurement::Measurement;

const MIN_TTL_NANOS: i64 = 5_000_000_000;

fn ttl_nanos(ttl: Duration) -> i64 {
    let nanos = ttl.as_nanos() as i64;
    nanos.max(MIN_TTL_NANOS)
}

/// Last-write-wins gauge with a per-gauge TTL (never below 5 s). Once the
/// TTL elapses without an update the stored value is discarded and the gauge
/// stops emitting.
pub struct Gauge {
    id: Id,
    last_updated: AtomicI64,
    ttl: AtomicI64,
    value: AtomicF64,
    gauge_id: OnceLock<Arc<Id>>,
}

impl Gauge {
    /// Create a gauge with the given TTL.
    #[must_use]
    pub fn new(id: Id, ttl: Duration) -> Self {
        Self {
            id,
            last_updated: AtomicI64::new(clock::unix_nanos()),
            ttl: AtomicI64::new(ttl_nanos(ttl)),
            value: AtomicF64::new(f64::NAN),
            gauge_id: OnceLock::new(),
        }
    }

    /// Set the current value.
    pub fn set(&self, value: f64) {
        self.last_updated
            .store(clock::unix_nanos(), Ordering::Relaxed);
        self.value.store(value);
    }

    /// The current value (NaN when unset or expired).
    #[must_use]
    pub fn get(&self) -> f64 {
        self.value.load()
    }

    /// Replace the TTL; subsequent reads observe the new value.
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl.store(ttl_nanos(ttl), Ordering::Relaxed);
    }

    /// The current TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_nanos(self.ttl.load(Ordering::Relaxed) as u64)
    }

    /// Whether the gauge value has outlived its TTL at time `now`.
    #[must_use]
    pub fn has_expired(&self, now: i64) -> bool {
        now - self.updated() > self.ttl.load(Ordering::Relaxed)
    }

    /// Snapshot at an explicit time.
    pub fn measure_at(&self, now: i64, results: &mut Vec<Measurement>) {
        let value = if self.has_expired(now) {
            self.value.swap(f64::NAN)
        } else {
            self.value.load()
        };
        if value.is_nan() {
            return;
        }
        let id = self
            .gauge_id
            .get_or_init(|| Arc::new(self.id.with_default_stat(refs().gauge)));
        results.push(Measurement::new(id.clone(), value));
    }
}

impl Meter for Gauge {
    fn meter_id(&self) -> &Id {
        &self.id
    }

    fn updated(&self) -> i64 {
        self.last_updated.load(Ordering::Relaxed)
    }

    fn measure(&self, results: &mut Vec<Measurement>) {
        self.measure_at(clock::unix_nanos(), results);
    }
}

#[cfg(test)]
mod tests {
    use super::{Gauge, Meter};
    use crate::clock;
    use crate::id::Id;
    use crate::intern::intern;
    use crate::tags::Tags;
    use std::time::Duration;

    #[test]
    fn emits_last_written_value() {
        let g = Gauge::new(Id::of("g", Tags::new()), Duration::from_secs(60));
        g.set(1.0);
        g.set(42.5);
        let mut out = Vec::new();
        g.measure(&mut out);
        assert_eq!(out.len(), 1);
        assert!((out[0].value - 42.5).abs() < f64::EPSILON);
        assert_eq!(
            out[0].id.tags().at(intern("statistic")),
            Some(intern("gauge"))
        );
    }

    #[test]
    fn unset_gauge_emits_nothing() {
        let g = Gauge::new(Id::of("g", Tags::new()), Duration::from_secs(60));
        let mut out = Vec::new();
        g.measure(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn ttl_clamps_to_five_seconds() {
        let g = Gauge::new(Id::of("g", Tags::new()), Duration::from_secs(1));
        assert_eq!(g.ttl(), Duration::from_secs(5));
        g.set_ttl(Duration::from_secs(2));
        assert_eq!(g.ttl(), Duration::from_secs(5));
        g.set_ttl(Duration::from_secs(30));
        assert_eq!(g.ttl(), Duration::from_secs(30));
    }

    #[test]
    fn expired_gauge_stops_emitting() {
        let g = Gauge::new(Id::of("g", Tags::new()), Duration::from_secs(5));
        g.set(9.0);
        let later = clock::unix_nanos() + 6_000_000_000;
        let mut out = Vec::new();
        g.measure_at(later, &mut out);
        assert!(out.is_empty());
        // the value was discarded, so an in-ttl read still sees nothing
        g.measure_at(clock::unix_nanos(), &mut out);
        assert!(out.is_empty());
        assert!(g.get().is_nan());
    }
}
