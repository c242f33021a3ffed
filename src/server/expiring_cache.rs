//! Cache for percentile composite meters.
//!
//! Percentile meters carry a 276-slot counter array, so rebuilding one per
//! line would be wasteful. The cache keys on [`Id`] equality (value-based
//! through interned strings) and sweeps entries idle for two minutes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::id::Id;

const EXPIRE_AFTER: Duration = Duration::from_secs(120);

struct CacheEntry<V> {
    last_used: Instant,
    value: Arc<V>,
}

pub(crate) struct ExpiringCache<V> {
    entries: Mutex<HashMap<Id, CacheEntry<V>>>,
}

impl<V> ExpiringCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the entry for `id`, refreshing its last-used time, or build one
    /// with `make`.
    pub fn get_or_create(&self, id: &Id, make: impl FnOnce(Id) -> V) -> Arc<V> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(id) {
            entry.last_used = Instant::now();
            return entry.value.clone();
        }
        let value = Arc::new(make(id.clone()));
        entries.insert(
            id.clone(),
            CacheEntry {
                last_used: Instant::now(),
                value: value.clone(),
            },
        );
        value
    }

    /// Sweep entries idle beyond the expiry window. Returns the size before
    /// the sweep and the number removed.
    pub fn expire(&self) -> (usize, usize) {
        let mut entries = self.entries.lock();
        let size = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.last_used) <= EXPIRE_AFTER);
        (size, size - entries.len())
    }
}
