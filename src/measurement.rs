//! Snapshot values produced by meters.

use std::fmt;
use std::sync::Arc;

use crate::id::Id;

/// One sampled value: a metric id and an `f64`.
///
/// The id is shared with the meter that produced the measurement, so a
/// snapshot stays valid even if the expirer removes the meter before the
/// batch is published.
#[derive(Clone)]
pub struct Measurement {
    /// Identifier the value is reported under.
    pub id: Arc<Id>,
    /// Sampled value.
    pub value: f64,
}

impl Measurement {
    /// Create a measurement.
    #[must_use]
    pub fn new(id: Arc<Id>, value: f64) -> Self {
        Self { id, value }
    }
}

impl PartialEq for Measurement {
    fn eq(&self, other: &Self) -> bool {
        (self.value - other.value).abs() < 1e-9 && self.id == other.id
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Measurement{{{}, {}}}", self.id, self.value)
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
