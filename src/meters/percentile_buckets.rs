//! Percentile bucket table.
//!
//! 276 buckets cover the positive `i64` range in approximately logarithmic
//! spacing: exact buckets for 0..=4, then nine subdivisions per power-of-4
//! span, with the final bucket pinned at `i64::MAX`. Bucket lookup inspects
//! the floor-log2 of the value and offsets into the span via a small
//! power-of-4 index table.

use std::sync::LazyLock;

use crate::intern::{intern, StrRef};

/// Number of percentile buckets.
pub const LENGTH: usize = 276;

struct Tables {
    values: Vec<i64>,
    power_of_4_index: Vec<usize>,
    timer_tags: Vec<StrRef>,
    dist_tags: Vec<StrRef>,
}

fn build_tables() -> Tables {
    let mut values: Vec<i64> = vec![1, 2, 3];
    let mut power_of_4_index: Vec<usize> = vec![0];

    let mut exp = 2u32;
    while exp < 64 {
        power_of_4_index.push(values.len());
        let mut current = 1i64 << exp;
        let delta = current / 3;
        // the last span wraps; the wrapped (negative) bound ends it immediately
        let next = current.wrapping_shl(2).wrapping_sub(delta);
        while current < next {
            values.push(current);
            current += delta;
        }
        exp += 2;
    }
    values.push(i64::MAX);

    debug_assert_eq!(values.len(), LENGTH);
    debug_assert_eq!(power_of_4_index.len(), 32);

    let timer_tags = (0..LENGTH)
        .map(|i| intern(&format!("T{i:04X}")))
        .collect();
    let dist_tags = (0..LENGTH)
        .map(|i| intern(&format!("D{i:04X}")))
        .collect();

    Tables {
        values,
        power_of_4_index,
        timer_tags,
        dist_tags,
    }
}

static TABLES: LazyLock<Tables> = LazyLock::new(build_tables);

/// Index of the bucket that counts `v`.
#[must_use]
pub fn index_of(v: i64) -> usize {
    if v <= 0 {
        0
    } else if v <= 4 {
        v as usize
    } else {
        let lz = v.leading_zeros();
        let mut shift = 64 - lz - 1;
        let prev_power_2 = (v >> shift) << shift;
        let mut prev_power_4 = prev_power_2;
        if shift % 2 != 0 {
            shift -= 1;
            prev_power_4 = prev_power_2 >> 1;
        }
        let base = prev_power_4;
        let delta = base / 3;
        let offset = ((v - base) / delta) as usize;
        let pos = offset + TABLES.power_of_4_index[(shift / 2) as usize];
        if pos >= LENGTH - 1 {
            LENGTH - 1
        } else {
            pos + 1
        }
    }
}

/// The bucket value `v` falls into (the upper bound of its bucket).
#[must_use]
pub fn bucket(v: i64) -> i64 {
    TABLES.values[index_of(v)]
}

/// Estimate a set of percentiles from per-bucket counts. `pcts` must be
/// sorted and each value in `[0, 100]`; one estimate is written to `results`
/// per requested percentile, interpolating linearly within a bucket.
pub fn percentiles(counts: &[i64; LENGTH], pcts: &[f64], results: &mut Vec<f64>) {
    results.clear();
    let total: i64 = counts.iter().sum();
    if total == 0 {
        results.resize(pcts.len(), f64::NAN);
        return;
    }

    let mut prev = 0i64;
    let mut prev_p = 0.0f64;
    let mut prev_b = 0i64;
    for (i, &count) in counts.iter().enumerate() {
        let next = prev + count;
        let next_p = 100.0 * next as f64 / total as f64;
        let next_b = TABLES.values[i];
        while results.len() < pcts.len() && next_p >= pcts[results.len()] {
            let f = (pcts[results.len()] - prev_p) / (next_p - prev_p);
            results.push(f * (next_b - prev_b) as f64 + prev_b as f64);
        }
        if results.len() >= pcts.len() {
            return;
        }
        prev = next;
        prev_p = next_p;
        prev_b = next_b;
    }
    let max_bucket = TABLES.values[LENGTH - 1] as f64;
    results.resize(pcts.len(), max_bucket);
}

/// Estimate a single percentile from per-bucket counts.
#[must_use]
pub fn percentile(counts: &[i64; LENGTH], p: f64) -> f64 {
    let mut results = Vec::with_capacity(1);
    percentiles(counts, &[p], &mut results);
    results.first().copied().unwrap_or(f64::NAN)
}

/// Interned `T%04X` label for a timer bucket index.
#[must_use]
pub fn timer_tag(index: usize) -> StrRef {
    TABLES.timer_tags[index]
}

/// Interned `D%04X` label for a distribution-summary bucket index.
#[must_use]
pub fn dist_tag(index: usize) -> StrRef {
    TABLES.dist_tags[index]
}
