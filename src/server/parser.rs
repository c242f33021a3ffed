//! Native line protocol.
//!
//! One line is `<type>[,<extra>]:<name>[,<k>=<v>...]:<value>`. Parsing is a
//! single left-to-right scan over the bytes; errors are returned as strings
//! and aggregated per datagram by the caller.

use std::time::Duration;

use tracing::info;

use super::Server;
use crate::clock;
use crate::id::Id;
use crate::intern::intern;
use crate::tags::Tags;

#[derive(Debug)]
pub(crate) struct ParsedMeasurement {
    pub id: Id,
    pub value: f64,
}

/// Parse the longest numeric prefix of `s` as an `f64`, returning the value
/// and the unconsumed remainder.
pub(crate) fn split_double(s: &str) -> Option<(f64, &str)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return None;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        // only consume the exponent if it is complete
        let mark = i;
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let mut exp_digits = 0;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            exp_digits += 1;
        }
        if exp_digits == 0 {
            i = mark;
        }
    }
    s[..i].parse::<f64>().ok().map(|value| (value, &s[i..]))
}

/// Parse `<name>[,<k>=<v>...]:<value>`. A warning (trailing garbage after
/// the value) does not fail the line.
pub(crate) fn get_measurement(s: &str) -> Result<(ParsedMeasurement, Option<String>), String> {
    // name runs up to the first ',' (tags) or ':' (value)
    let mut pos = s.find([',', ':']).ok_or_else(|| String::from("Missing name"))?;
    if pos == 0 {
        return Err(String::from("Missing name"));
    }
    let name = &s[..pos];
    let mut tags = Tags::new();

    if s.as_bytes()[pos] == b',' {
        while pos < s.len() && s.as_bytes()[pos] != b':' {
            pos += 1;
            let Some(eq_rel) = s[pos..].find('=') else {
                break;
            };
            let key = &s[pos..pos + eq_rel];
            let val_start = pos + eq_rel + 1;
            let Some(end_rel) = s[val_start..].find([',', ':']) else {
                return Err(String::from("Missing value"));
            };
            tags.add(intern(key), intern(&s[val_start..val_start + end_rel]));
            pos = val_start + end_rel;
        }
    }
    pos += 1;
    if pos > s.len() {
        return Err(String::from("Unable to parse value for measurement"));
    }

    let Some((value, rest)) = split_double(&s[pos..]) else {
        return Err(String::from("Unable to parse value for measurement"));
    };
    let warning = match rest.chars().next() {
        Some(c) if !c.is_whitespace() => Some(format!(
            "Got {value} parsing value, ignoring chars starting at {rest}"
        )),
        _ => None,
    };

    Ok((
        ParsedMeasurement {
            id: Id::new(intern(name), tags),
            value,
        },
        warning,
    ))
}

impl Server {
    pub(crate) fn parse_line(&self, line: &str) -> Result<(), String> {
        let bytes = line.as_bytes();
        let meter_type = bytes[0];

        let mut idx = 1;
        let mut extra: i64 = 0;
        if bytes.get(idx) == Some(&b',') {
            idx += 1;
            let start = idx;
            if bytes.get(idx) == Some(&b'-') {
                idx += 1;
            }
            while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                idx += 1;
            }
            extra = line[start..idx].parse().unwrap_or(0);
            if extra <= 0 {
                if meter_type == b'g' {
                    return Err(format!("Invalid ttl specified for gauge at index {start}"));
                }
                if meter_type == b'X' {
                    return Err(format!(
                        "Invalid timestamp specified for monotonic sampled source at index {start}"
                    ));
                }
            }
        }
        if bytes.get(idx) != Some(&b':') {
            return Err(format!("Expecting separator ':' at index {idx}"));
        }

        let rest = &line[idx + 1..];
        let (measurement, warning) = get_measurement(rest)?;
        if let Some(warning) = warning {
            info!("While parsing {rest}: {warning}");
        }
        let ParsedMeasurement { id, value } = measurement;
        let registry = &self.registry;

        match meter_type {
            b't' => {
                // elapsed time arrives in seconds
                registry.get_timer(id).record_nanos((value * 1e9) as i64);
            }
            b'c' => {
                registry.get_counter(id).add(value);
            }
            b'C' => {
                registry.get_monotonic_counter(id).set(value);
            }
            b'U' => {
                registry.get_monotonic_counter_uint(id).set(value as u64);
            }
            b'g' => {
                if extra > 0 {
                    registry
                        .get_gauge_with_ttl(id, Duration::from_secs(extra as u64))
                        .set(value);
                } else {
                    // preserves the previous ttl rather than overriding it
                    registry.get_gauge(id).set(value);
                }
            }
            b'm' => {
                registry.get_max_gauge(id).update(value);
            }
            b'd' => {
                registry.get_dist_summary(id).record(value);
            }
            b'T' => {
                self.percentile_timer(id).record_nanos((value * 1e9) as i64);
            }
            b'D' => {
                self.percentile_dist_summary(id).record(value as i64);
            }
            b'X' => {
                if extra > 0 {
                    // extra is milliseconds since the epoch
                    let ts_nanos = (extra as u64) * 1_000_000;
                    registry.get_monotonic_sampled(id).set(value as u64, ts_nanos);
                }
            }
            b'A' => {
                registry
                    .get_age_gauge(id)
                    .update_last_success(clock::unix_nanos());
            }
            other => {
                return Err(format!("Unknown type: {}", char::from(other)));
            }
        }
        Ok(())
    }
}
