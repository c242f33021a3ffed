//! Meter types.
//!
//! Every meter owns its [`Id`], tracks a last-update timestamp for TTL
//! sweeping, and appends zero or more measurements when snapshotted. Updates
//! go through atomics (or one narrow mutex for the sampled variant) so
//! writers never contend on anything but the cell they touch.

mod atomics;

mod age_gauge;
mod counter;
mod dist_summary;
mod gauge;
mod max_gauge;
mod monotonic_counter;
mod monotonic_counter_uint;
mod monotonic_sampled;
pub mod percentile_buckets;
mod percentile_dist_summary;
mod percentile_timer;
mod timer;

pub use age_gauge::AgeGauge;
pub use counter::Counter;
pub use dist_summary::DistributionSummary;
pub use gauge::Gauge;
pub use max_gauge::MaxGauge;
pub use monotonic_counter::MonotonicCounter;
pub use monotonic_counter_uint::MonotonicCounterUint;
pub use monotonic_sampled::MonotonicSampled;
pub use percentile_dist_summary::PercentileDistributionSummary;
pub use percentile_timer::PercentileTimer;
pub use timer::Timer;

use crate::id::Id;
use crate::measurement::Measurement;

/// Common contract for all meter types.
pub trait Meter: Send + Sync {
    /// The id this meter was registered under.
    fn meter_id(&self) -> &Id;

    /// Nanoseconds-since-epoch of the last update.
    fn updated(&self) -> i64;

    /// Append this meter's measurements and reset publication-scoped state.
    fn measure(&self, results: &mut Vec<Measurement>);

    /// Whether the registry should sweep this meter. Age gauges override
    /// this to never expire.
    fn is_expired(&self, now: i64, meter_ttl_nanos: i64) -> bool {
        now - self.updated() > meter_ttl_nanos
    }
}
