//! statsd line protocol.
//!
//! `<name>:<value>|<type>[|@<rate>][|#<tag>[,<tag>...]]` with `<tag>` as
//! `k:v` (a bare marker tag maps to `k=1`). Supported types are `c`, `g`,
//! `h`, `ms`, and `s`; sets are logged and ignored.

use tracing::info;

use super::parser::split_double;
use super::Server;
use crate::id::Id;
use crate::intern::intern;
use crate::tags::Tags;

enum StatsdType {
    Counter,
    Gauge,
    Histogram,
    Timing,
    Set,
}

impl Server {
    pub(crate) fn parse_statsd_line(&self, line: &str) -> Result<(), String> {
        let colon = line
            .find(':')
            .filter(|&p| p > 0)
            .ok_or_else(|| String::from("Invalid format: name is required"))?;
        let name = &line[..colon];
        let rest = &line[colon + 1..];

        let Some((value, rest)) = split_double(rest) else {
            return Err(format!("Unable to parse value starting at {rest}"));
        };
        let Some(rest) = rest.strip_prefix('|') else {
            return Err(format!("Invalid format. Expected | starting at {rest}"));
        };

        let (metric_type, rest) = if let Some(r) = rest.strip_prefix("ms") {
            (StatsdType::Timing, r)
        } else if let Some(r) = rest.strip_prefix('c') {
            (StatsdType::Counter, r)
        } else if let Some(r) = rest.strip_prefix('g') {
            (StatsdType::Gauge, r)
        } else if let Some(r) = rest.strip_prefix('h') {
            (StatsdType::Histogram, r)
        } else if let Some(r) = rest.strip_prefix('s') {
            (StatsdType::Set, r)
        } else if rest.starts_with('m') {
            return Err(format!("Invalid metric type for {line}"));
        } else {
            return Err(format!("Invalid type for name {name} ({line})"));
        };

        let mut sampling_rate = 1.0;
        let mut tags = Tags::new();
        if let Some(sections) = rest.strip_prefix('|') {
            let mut sections = sections;
            if let Some(after_at) = sections.strip_prefix('@') {
                let Some((rate, remainder)) = split_double(after_at) else {
                    return Err(format!("Invalid sampling rate for name={name}"));
                };
                if rate <= 0.0 || rate > 1.0 {
                    return Err(format!("Invalid sampling rate for name={name}"));
                }
                sampling_rate = rate;
                sections = remainder.strip_prefix('|').unwrap_or(remainder);
            }
            if let Some(tag_list) = sections.strip_prefix('#') {
                for token in tag_list.split(',') {
                    // marker tags like #shell map to shell=1
                    let (key, val) = match token.split_once(':') {
                        Some((key, val)) => (key, val),
                        None => (token, "1"),
                    };
                    if key.is_empty() || val.is_empty() {
                        return Err(format!("Invalid tags for name={name}"));
                    }
                    tags.add(intern(key), intern(val));
                }
            }
        }

        let id = Id::new(intern(name), tags);
        let registry = &self.registry;
        match metric_type {
            StatsdType::Counter => {
                registry.get_counter(id).add(value / sampling_rate);
            }
            StatsdType::Gauge => {
                // sampling rate is ignored for gauges
                registry.get_gauge(id).set(value);
            }
            StatsdType::Histogram => {
                let repeat = (1.0 / sampling_rate).round() as i64;
                let histogram = registry.get_dist_summary(id);
                for _ in 0..repeat {
                    histogram.record(value);
                }
            }
            StatsdType::Timing => {
                let repeat = (1.0 / sampling_rate).round() as i64;
                let nanos = (value * 1e6).round() as i64;
                let timer = registry.get_timer(id);
                for _ in 0..repeat {
                    timer.record_nanos(nanos);
                }
            }
            StatsdType::Set => {
                info!("Ignoring set cardinality metric for {id}");
            }
        }
        Ok(())
    }
}
