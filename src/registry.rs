//! The meter registry.
//!
//! Owns one map per meter type, each behind its own lock. `get_*` calls
//! insert lazily and hand out shared handles, so callers and the registry
//! co-own meters; expiration only drops the map's reference. Snapshots
//! flatten every live meter into a measurement list, and two background
//! tasks (the expirer and the publisher) run on their own threads for the
//! registry's lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam::channel::{bounded, tick, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock;
use crate::config::Config;
use crate::id::Id;
use crate::intern::intern;
use crate::measurement::Measurement;
use crate::meters::{
    AgeGauge, Counter, DistributionSummary, Gauge, MaxGauge, Meter, MonotonicCounter,
    MonotonicCounterUint, MonotonicSampled, Timer,
};
use crate::publisher;
use crate::tags::Tags;

/// Callback invoked with every snapshot the registry produces.
pub type MeasurementsCallback = Box<dyn Fn(&[Measurement]) + Send + Sync>;

struct MeterMap<M> {
    meters: Mutex<HashMap<Id, Arc<M>>>,
}

impl<M: Meter> MeterMap<M> {
    fn new() -> Self {
        Self {
            meters: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, id: Id, make: impl FnOnce(Id) -> M) -> Arc<M> {
        let mut guard = self.meters.lock();
        if let Some(meter) = guard.get(&id) {
            return meter.clone();
        }
        let meter = Arc::new(make(id.clone()));
        guard.insert(id, meter.clone());
        meter
    }

    fn measure(&self, results: &mut Vec<Measurement>, now: i64, meter_ttl_nanos: i64) {
        let guard = self.meters.lock();
        for meter in guard.values() {
            if !meter.is_expired(now, meter_ttl_nanos) {
                meter.measure(results);
            }
        }
    }

    fn remove_expired(&self, now: i64, meter_ttl_nanos: i64) -> (usize, usize) {
        let mut guard = self.meters.lock();
        let total = guard.len();
        guard.retain(|_, meter| !meter.is_expired(now, meter_ttl_nanos));
        (total - guard.len(), total)
    }

    fn remove(&self, id: &Id) -> bool {
        self.meters.lock().remove(id).is_some()
    }

    fn clear(&self) {
        self.meters.lock().clear();
    }

    fn len(&self) -> usize {
        self.meters.lock().len()
    }

    fn snapshot(&self) -> Vec<Arc<M>> {
        self.meters.lock().values().cloned().collect()
    }
}

struct AllMeters {
    age_gauges: MeterMap<AgeGauge>,
    counters: MeterMap<Counter>,
    dist_sums: MeterMap<DistributionSummary>,
    gauges: MeterMap<Gauge>,
    max_gauges: MeterMap<MaxGauge>,
    mono_counters: MeterMap<MonotonicCounter>,
    mono_counters_uint: MeterMap<MonotonicCounterUint>,
    mono_sampled: MeterMap<MonotonicSampled>,
    timers: MeterMap<Timer>,
}

impl AllMeters {
    fn new() -> Self {
        Self {
            age_gauges: MeterMap::new(),
            counters: MeterMap::new(),
            dist_sums: MeterMap::new(),
            gauges: MeterMap::new(),
            max_gauges: MeterMap::new(),
            mono_counters: MeterMap::new(),
            mono_counters_uint: MeterMap::new(),
            mono_sampled: MeterMap::new(),
            timers: MeterMap::new(),
        }
    }

    fn size(&self) -> usize {
        self.age_gauges.len()
            + self.counters.len()
            + self.dist_sums.len()
            + self.gauges.len()
            + self.max_gauges.len()
            + self.mono_counters.len()
            + self.mono_counters_uint.len()
            + self.mono_sampled.len()
            + self.timers.len()
    }

    fn measure(&self, now: i64, ttl: i64) -> Vec<Measurement> {
        let mut results = Vec::with_capacity(self.size() * 2);
        self.age_gauges.measure(&mut results, now, ttl);
        self.counters.measure(&mut results, now, ttl);
        self.dist_sums.measure(&mut results, now, ttl);
        self.gauges.measure(&mut results, now, ttl);
        self.max_gauges.measure(&mut results, now, ttl);
        self.mono_counters.measure(&mut results, now, ttl);
        self.mono_counters_uint.measure(&mut results, now, ttl);
        self.mono_sampled.measure(&mut results, now, ttl);
        self.timers.measure(&mut results, now, ttl);
        results
    }

    fn remove_expired(&self, now: i64, ttl: i64) -> (usize, usize) {
        let mut expired = 0;
        let mut total = 0;
        // age gauges are exempt from ttl sweeping
        for (e, t) in [
            self.counters.remove_expired(now, ttl),
            self.dist_sums.remove_expired(now, ttl),
            self.gauges.remove_expired(now, ttl),
            self.max_gauges.remove_expired(now, ttl),
            self.mono_counters.remove_expired(now, ttl),
            self.mono_counters_uint.remove_expired(now, ttl),
            self.mono_sampled.remove_expired(now, ttl),
            self.timers.remove_expired(now, ttl),
        ] {
            expired += e;
            total += t;
        }
        (expired, total)
    }
}

struct BackgroundTask {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Tasks {
    expirer: Option<BackgroundTask>,
    publisher: Option<BackgroundTask>,
}

/// Owner of all meters and the publish pipeline.
pub struct Registry {
    config: Config,
    meter_ttl_nanos: i64,
    common_tags: ArcSwap<Tags>,
    meters: AllMeters,
    registry_size: Arc<DistributionSummary>,
    callbacks: Mutex<Vec<MeasurementsCallback>>,
    age_gauge_first_warn: AtomicBool,
    last_successful_send: AtomicI64,
    tasks: Mutex<Tasks>,
}

impl Registry {
    /// Create a registry from a configuration. Background tasks are not
    /// started until [`Registry::start`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mut meter_ttl_nanos = config.meter_ttl.as_nanos() as i64;
        if meter_ttl_nanos == 0 {
            meter_ttl_nanos = 15 * 60 * 1_000_000_000;
        }
        let mut common_tags = Tags::new();
        for (k, v) in &config.common_tags {
            common_tags.add(intern(k), intern(v));
        }
        let meters = AllMeters::new();
        let registry_size = meters.dist_sums.get_or_create(
            Id::of("spectator.registrySize", Tags::of(&[("owner", "spectatord")])),
            DistributionSummary::new,
        );
        Self {
            config,
            meter_ttl_nanos,
            common_tags: ArcSwap::from_pointee(common_tags),
            meters,
            registry_size,
            callbacks: Mutex::new(Vec::new()),
            age_gauge_first_warn: AtomicBool::new(true),
            last_successful_send: AtomicI64::new(clock::unix_nanos()),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    /// The configuration this registry was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current process-wide common tags.
    #[must_use]
    pub fn common_tags(&self) -> Arc<Tags> {
        self.common_tags.load_full()
    }

    /// Get or create a counter.
    pub fn get_counter(&self, id: Id) -> Arc<Counter> {
        self.meters.counters.get_or_create(id, Counter::new)
    }

    /// Get or create a monotonic counter (signed).
    pub fn get_monotonic_counter(&self, id: Id) -> Arc<MonotonicCounter> {
        self.meters
            .mono_counters
            .get_or_create(id, MonotonicCounter::new)
    }

    /// Get or create a monotonic counter over an unsigned source.
    pub fn get_monotonic_counter_uint(&self, id: Id) -> Arc<MonotonicCounterUint> {
        self.meters
            .mono_counters_uint
            .get_or_create(id, MonotonicCounterUint::new)
    }

    /// Get or create a timestamp-sampled monotonic counter.
    pub fn get_monotonic_sampled(&self, id: Id) -> Arc<MonotonicSampled> {
        self.meters
            .mono_sampled
            .get_or_create(id, MonotonicSampled::new)
    }

    /// Get or create a distribution summary.
    pub fn get_dist_summary(&self, id: Id) -> Arc<DistributionSummary> {
        self.meters
            .dist_sums
            .get_or_create(id, DistributionSummary::new)
    }

    /// Get or create a gauge. A new gauge takes the meter TTL as its own;
    /// an existing gauge keeps whatever TTL it already has.
    pub fn get_gauge(&self, id: Id) -> Arc<Gauge> {
        let ttl = self.config.meter_ttl;
        self.meters
            .gauges
            .get_or_create(id, |id| Gauge::new(id, ttl))
    }

    /// Get or create a gauge with an explicit TTL, updating the TTL of an
    /// existing gauge.
    pub fn get_gauge_with_ttl(&self, id: Id, ttl: Duration) -> Arc<Gauge> {
        let gauge = self
            .meters
            .gauges
            .get_or_create(id, |id| Gauge::new(id, ttl));
        // in case the previous ttl was different
        gauge.set_ttl(ttl);
        gauge
    }

    /// Get or create a max gauge.
    pub fn get_max_gauge(&self, id: Id) -> Arc<MaxGauge> {
        self.meters.max_gauges.get_or_create(id, MaxGauge::new)
    }

    /// Get or create a timer.
    pub fn get_timer(&self, id: Id) -> Arc<Timer> {
        self.meters.timers.get_or_create(id, Timer::new)
    }

    /// Get or create an age gauge, subject to the configured limit. Once the
    /// limit is reached, novel ids get a detached gauge the registry does
    /// not retain, so the caller stays uniform but nothing is published.
    pub fn get_age_gauge(&self, id: Id) -> Arc<AgeGauge> {
        let limit = self.config.age_gauge_limit;
        let mut guard = self.meters.age_gauges.meters.lock();
        if let Some(gauge) = guard.get(&id) {
            return gauge.clone();
        }
        if guard.len() < limit {
            let gauge = Arc::new(AgeGauge::new(id.clone()));
            guard.insert(id, gauge.clone());
            return gauge;
        }
        warn!("max number of age gauges ({limit}) has been reached, skipping creation");
        if self.age_gauge_first_warn.swap(false, Ordering::Relaxed) {
            for (i, known) in guard.keys().enumerate() {
                warn!("known age gauge {i}: {known}");
            }
        }
        Arc::new(AgeGauge::new(id))
    }

    /// Snapshot every live meter into a flat measurement list.
    pub fn measurements(&self) -> Vec<Measurement> {
        let now = clock::unix_nanos();
        let results = self.meters.measure(now, self.meter_ttl_nanos);
        self.registry_size.record(results.len() as f64);
        for callback in self.callbacks.lock().iter() {
            callback(&results);
        }
        results
    }

    /// Number of meters currently registered.
    #[must_use]
    pub fn size(&self) -> usize {
        self.meters.size()
    }

    /// Register a callback invoked synchronously with every snapshot.
    pub fn on_measurements(&self, callback: MeasurementsCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Nanoseconds-since-epoch of the last successful publish.
    #[must_use]
    pub fn last_success_time(&self) -> i64 {
        self.last_successful_send.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_success_time(&self, now: i64) {
        self.last_successful_send.store(now, Ordering::Relaxed);
    }

    /// Add or overwrite a common tag.
    pub fn update_common_tag(&self, key: &str, value: &str) {
        let mut tags = Tags::clone(&self.common_tags.load());
        tags.add(intern(key), intern(value));
        self.common_tags.store(Arc::new(tags));
    }

    /// Remove a common tag.
    pub fn erase_common_tag(&self, key: &str) {
        let mut tags = Tags::clone(&self.common_tags.load());
        tags.remove(intern(key));
        self.common_tags.store(Arc::new(tags));
    }

    /// Delete one meter by type code (`A` or `g`). Returns whether a meter
    /// was removed.
    pub fn delete_meter(&self, meter_type: &str, id: &Id) -> bool {
        match meter_type {
            "A" => self.meters.age_gauges.remove(id),
            "g" => self.meters.gauges.remove(id),
            _ => false,
        }
    }

    /// Delete every meter of a type code (`A` or `g`).
    pub fn delete_all_meters(&self, meter_type: &str) {
        match meter_type {
            "A" => self.meters.age_gauges.clear(),
            "g" => self.meters.gauges.clear(),
            _ => {}
        }
    }

    /// Start the expirer and publisher threads. Idempotent.
    pub fn start(registry: &Arc<Self>) {
        let mut tasks = registry.tasks.lock();
        if tasks.publisher.is_none() {
            tasks.publisher = publisher::start(registry.clone())
                .map(|(shutdown, handle)| BackgroundTask { shutdown, handle });
        }
        if tasks.expirer.is_none() {
            tasks.expirer = Self::spawn_expirer(registry.clone());
        }
    }

    /// Signal background tasks and join them. Idempotent.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock();
        for task in [tasks.publisher.take(), tasks.expirer.take()]
            .into_iter()
            .flatten()
        {
            drop(task.shutdown);
            let _ = task.handle.join();
        }
    }

    fn spawn_expirer(registry: Arc<Self>) -> Option<BackgroundTask> {
        let frequency = registry.config.expiration_frequency;
        if frequency.is_zero() {
            debug!("meter expiration disabled");
            return None;
        }
        let (shutdown, receiver) = bounded::<()>(1);
        let handle = std::thread::spawn(move || registry.expirer_loop(&receiver, frequency));
        Some(BackgroundTask { shutdown, handle })
    }

    fn expirer_loop(&self, shutdown: &Receiver<()>, frequency: Duration) {
        debug!(
            "expiring meters with ttl {:?} every {:?}",
            self.config.meter_ttl, frequency
        );
        let ticker = tick(frequency);
        loop {
            select! {
                recv(ticker) -> _ => self.remove_expired_meters(),
                recv(shutdown) -> _ => break,
            }
        }
        debug!("stopping expirer");
    }

    pub(crate) fn remove_expired_meters(&self) {
        let now = clock::unix_nanos();
        let (expired, total) = self.meters.remove_expired(now, self.meter_ttl_nanos);
        debug!("removed {expired} expired meters out of {total} total");
    }

    /// Live age gauges, for the admin surface.
    #[must_use]
    pub fn age_gauges(&self) -> Vec<Arc<AgeGauge>> {
        self.meters.age_gauges.snapshot()
    }

    /// Live counters, for the admin surface.
    #[must_use]
    pub fn counters(&self) -> Vec<Arc<Counter>> {
        self.meters.counters.snapshot()
    }

    /// Live distribution summaries, for the admin surface.
    #[must_use]
    pub fn dist_summaries(&self) -> Vec<Arc<DistributionSummary>> {
        self.meters.dist_sums.snapshot()
    }

    /// Live gauges, for the admin surface.
    #[must_use]
    pub fn gauges(&self) -> Vec<Arc<Gauge>> {
        self.meters.gauges.snapshot()
    }

    /// Live max gauges, for the admin surface.
    #[must_use]
    pub fn max_gauges(&self) -> Vec<Arc<MaxGauge>> {
        self.meters.max_gauges.snapshot()
    }

    /// Live monotonic counters, for the admin surface.
    #[must_use]
    pub fn monotonic_counters(&self) -> Vec<Arc<MonotonicCounter>> {
        self.meters.mono_counters.snapshot()
    }

    /// Live unsigned monotonic counters, for the admin surface.
    #[must_use]
    pub fn monotonic_counters_uint(&self) -> Vec<Arc<MonotonicCounterUint>> {
        self.meters.mono_counters_uint.snapshot()
    }

    /// Live timers, for the admin surface.
    #[must_use]
    pub fn timers(&self) -> Vec<Arc<Timer>> {
        self.meters.timers.snapshot()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.stop();
    }
}
