use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use super::Meter;
use crate::clock;
use crate::id::Id;
use crate::intern::refs;
use crate::measurement::Measurement;

/// Gauge reporting the seconds elapsed since the last explicit success
/// signal. Age gauges never expire by TTL; they are removed only through the
/// admin surface.
pub struct AgeGauge {
    id: Id,
    last_success: AtomicI64,
    gauge_id: OnceLock<Arc<Id>>,
}

impl AgeGauge {
    /// Create an age gauge with a last-success time of the epoch.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            last_success: AtomicI64::new(0),
            gauge_id: OnceLock::new(),
        }
    }

    /// Record a success at `now` (nanoseconds since the epoch).
    pub fn update_last_success(&self, now: i64) {
        self.last_success.store(now, Ordering::Relaxed);
    }

    /// The recorded last-success time.
    #[must_use]
    pub fn last_success(&self) -> i64 {
        self.last_success.load(Ordering::Relaxed)
    }

    /// Seconds between `now` and the last success.
    #[must_use]
    pub fn value_at(&self, now: i64) -> f64 {
        (now - self.last_success()) as f64 / 1e9
    }

    /// Seconds since the last success.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value_at(clock::unix_nanos())
    }
}

impl Meter for AgeGauge {
    fn meter_id(&self) -> &Id {
        &self.id
    }

    fn updated(&self) -> i64 {
        self.last_success()
    }

    fn measure(&self, results: &mut Vec<Measurement>) {
        let id = self
            .gauge_id
            .get_or_init(|| Arc::new(self.id.with_default_stat(refs().gauge)));
        results.push(Measurement::new(id.clone(), self.value()));
    }

    fn is_expired(&self, _now: i64, _meter_ttl_nanos: i64) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::{AgeGauge, Meter};
    use crate::id::Id;
    use crate::intern::intern;
    use crate::tags::Tags;

    #[test]
    fn reports_elapsed_seconds() {
        let g = AgeGauge::new(Id::of("a", Tags::new()));
        g.update_last_success(5_000_000_000);
        assert!((g.value_at(12_500_000_000) - 7.5).abs() < 1e-9);
    }

    #[test]
    fn always_emits() {
        let g = AgeGauge::new(Id::of("a", Tags::new()));
        let mut out = Vec::new();
        g.measure(&mut out);
        g.measure(&mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].id.tags().at(intern("statistic")),
            Some(intern("gauge"))
        );
    }

    #[test]
    fn never_ttl_expires() {
        let g = AgeGauge::new(Id::of("a", Tags::new()));
        assert!(!g.is_expired(i64::MAX, 1));
    }
}
