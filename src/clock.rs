use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock nanoseconds since the UNIX epoch.
///
/// Meter update timestamps, gauge TTLs, and age gauge values all share this
/// clock so that externally supplied timestamps (milliseconds since the epoch
/// on the wire) compare directly against it.
pub(crate) fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as i64)
}

#[cfg(test)]
mod tests {
    use super::unix_nanos;

    #[test]
    fn advances() {
        let a = unix_nanos();
        let b = unix_nanos();
        assert!(b >= a);
        // sometime after 2020
        assert!(a > 1_577_836_800_000_000_000);
    }
}
