//! Periodic measurement publishing.
//!
//! A single long-lived thread snapshots the registry every `frequency`,
//! splits the measurements into batches, and fans the batches out to a
//! bounded pool of workers that each encode, gzip, and POST. Responses are
//! classified into sent/dropped outcome counters; scope join is the barrier
//! that ends a tick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, trace, warn};

use crate::clock;
use crate::http::{HttpClient, HttpClientConfig, HttpResponse};
use crate::id::Id;
use crate::intern::{intern, refs, StrRef};
use crate::measurement::Measurement;
use crate::meters::Counter;
use crate::registry::Registry;
use crate::smile::SmilePayload;
use crate::tags::Tags;
use crate::DaemonResult;

/// Spawn the publisher thread. Returns `None` (and logs) when the
/// configuration has no aggregator URI or the HTTP client cannot be built.
pub(crate) fn start(registry: Arc<Registry>) -> Option<(Sender<()>, JoinHandle<()>)> {
    let cfg = registry.config();
    if cfg.uri.is_empty() {
        warn!("registry config has no uri, ignoring publisher start request");
        return None;
    }

    let read_timeout = if cfg.read_timeout.is_zero() {
        Duration::from_secs(3)
    } else {
        cfg.read_timeout
    };
    let connect_timeout = if cfg.connect_timeout.is_zero() {
        Duration::from_secs(2)
    } else {
        cfg.connect_timeout
    };
    let http_config = HttpClientConfig {
        connect_timeout,
        read_timeout,
        read_body: true,
        verbose_requests: cfg.verbose_http,
        status_metrics_enabled: cfg.status_metrics_enabled,
        external_enabled: cfg.external_enabled,
        cert_info: cfg.cert_info.clone(),
    };
    let client = match HttpClient::new(registry.clone(), http_config) {
        Ok(client) => client,
        Err(err) => {
            warn!("unable to build publisher http client: {err}");
            return None;
        }
    };

    let publisher = Publisher::new(registry, client);
    let (shutdown, receiver) = bounded::<()>(1);
    let handle = std::thread::spawn(move || publisher.run(&receiver));
    Some((shutdown, handle))
}

#[derive(Deserialize)]
struct AggregatorResponse {
    #[serde(rename = "errorCount")]
    error_count: usize,
    #[serde(default)]
    message: Vec<String>,
}

struct Publisher {
    registry: Arc<Registry>,
    client: HttpClient,
    sent: Arc<Counter>,
    invalid: Arc<Counter>,
    dropped_http: Arc<Counter>,
    dropped_other: Arc<Counter>,
    num_workers: usize,
}

fn outcome_counter(registry: &Arc<Registry>, tags: &[(&str, &str)]) -> Arc<Counter> {
    let mut t = Tags::of(tags);
    t.add(intern("owner"), intern("spectatord"));
    registry.get_counter(Id::of("spectator.measurements", t))
}

impl Publisher {
    fn new(registry: Arc<Registry>, client: HttpClient) -> Self {
        let num_workers = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            sent: outcome_counter(&registry, &[("id", "sent")]),
            invalid: outcome_counter(&registry, &[("id", "dropped"), ("error", "validation")]),
            dropped_http: outcome_counter(&registry, &[("id", "dropped"), ("error", "http-error")]),
            dropped_other: outcome_counter(&registry, &[("id", "dropped"), ("error", "other")]),
            num_workers: num_workers.min(8),
            registry,
            client,
        }
    }

    fn run(&self, shutdown: &Receiver<()>) {
        let frequency = self.registry.config().frequency;
        info!(
            "starting to send metrics to {} every {:?}",
            self.registry.config().uri,
            frequency
        );
        info!(
            "publishing metrics with the following common tags: {}",
            self.registry.common_tags()
        );

        loop {
            let start = Instant::now();
            self.send_metrics();
            let sleep = frequency.saturating_sub(start.elapsed());
            select! {
                recv(shutdown) -> _ => break,
                default(sleep) => {}
            }
        }
        info!("stopping publisher");
    }

    fn send_metrics(&self) {
        let cfg = self.registry.config();
        let start = Instant::now();
        let measurements = self.registry.measurements();
        if measurements.is_empty() || !cfg.is_enabled() {
            trace!("skip sending metrics: publishing disabled or nothing to send");
            return;
        }

        // picked up each tick so admin tag updates apply on the next publish
        let common_tags = self.registry.common_tags();
        let batches: Vec<&[Measurement]> = measurements.chunks(cfg.batch_size.max(1)).collect();
        let next_batch = AtomicUsize::new(0);
        let responses: Mutex<Vec<(usize, HttpResponse)>> =
            Mutex::new(Vec::with_capacity(batches.len()));

        let workers = self.num_workers.min(batches.len()).max(1);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next_batch.fetch_add(1, Ordering::Relaxed);
                    let Some(batch) = batches.get(index) else {
                        break;
                    };
                    let response = match encode_batch(&common_tags, batch) {
                        Ok(payload) => self.client.post_smile(&cfg.uri, payload),
                        Err(err) => {
                            info!(
                                "failed to compress payload of {} measurements for {}: {err}",
                                batch.len(),
                                cfg.uri
                            );
                            HttpResponse::transport_failure()
                        }
                    };
                    if response.is_success() {
                        self.registry.set_last_success_time(clock::unix_nanos());
                    }
                    responses.lock().push((batch.len(), response));
                });
            }
        });

        let mut num_sent = 0usize;
        let mut num_err = 0usize;
        let mut err_messages: HashSet<String> = HashSet::new();
        for (batch_size, response) in responses.into_inner() {
            let (sent, errors) = self.handle_response(batch_size, &response, &mut err_messages);
            num_sent += sent;
            num_err += errors;
        }

        let elapsed = start.elapsed();
        if num_err > 0 {
            info!(
                "Sent: {num_sent} Dropped: {num_err} Total: {}. Elapsed {:.3}s",
                measurements.len(),
                elapsed.as_secs_f64()
            );
        } else {
            debug!(
                "Sent: {num_sent} Dropped: {num_err} Total: {}. Elapsed {:.3}s",
                measurements.len(),
                elapsed.as_secs_f64()
            );
        }
        for message in err_messages {
            info!("Validation error: {message}");
        }
    }

    /// Classify one batch response into (sent, dropped) and bump the
    /// corresponding outcome counters.
    fn handle_response(
        &self,
        num_measurements: usize,
        response: &HttpResponse,
        err_messages: &mut HashSet<String>,
    ) -> (usize, usize) {
        let cfg = self.registry.config();
        let status_metrics = cfg.status_metrics_enabled;

        if response.is_success() {
            if status_metrics {
                self.sent.add(num_measurements as f64);
            }
            return (num_measurements, 0);
        }

        if response.status == -1 {
            // connection error or timeout
            if status_metrics {
                self.dropped_other.add(num_measurements as f64);
            }
            return (0, num_measurements);
        }

        if response.status < 500 {
            // partial validation failures come back as json
            return match serde_json::from_str::<AggregatorResponse>(&response.body) {
                Ok(body) => {
                    let errors = body.error_count.min(num_measurements);
                    let sent = num_measurements - errors;
                    if status_metrics {
                        self.invalid.add(errors as f64);
                        self.sent.add(sent as f64);
                    }
                    for message in body.message {
                        err_messages.insert(message);
                    }
                    (sent, errors)
                }
                Err(_) => {
                    error!(
                        "unable to parse JSON response from {} - status {}: {}",
                        cfg.uri, response.status, response.body
                    );
                    if status_metrics {
                        self.dropped_other.add(num_measurements as f64);
                    }
                    (0, num_measurements)
                }
            };
        }

        if status_metrics {
            self.dropped_http.add(num_measurements as f64);
        }
        (0, num_measurements)
    }
}

enum Op {
    Add = 0,
    Max = 10,
}

fn op_for(tags: &Tags) -> Op {
    let r = refs();
    match tags.at(r.statistic) {
        Some(stat)
            if stat == r.count
                || stat == r.total_amount
                || stat == r.total_time
                || stat == r.total_of_squares
                || stat == r.percentile =>
        {
            Op::Add
        }
        _ => Op::Max,
    }
}

#[derive(Default)]
struct StrTable {
    order: Vec<StrRef>,
    index: HashMap<StrRef, usize>,
}

impl StrTable {
    fn add(&mut self, s: StrRef) {
        if !self.index.contains_key(&s) {
            self.index.insert(s, self.order.len());
            self.order.push(s);
        }
    }

    fn index_of(&self, s: StrRef) -> usize {
        self.index.get(&s).map_or(0, |i| *i)
    }
}

/// Encode one batch: string table, then one record per measurement.
pub(crate) fn encode_batch(
    common_tags: &Tags,
    batch: &[Measurement],
) -> DaemonResult<Vec<u8>> {
    let mut table = StrTable::default();
    for tag in common_tags {
        table.add(tag.key);
        table.add(tag.value);
    }
    table.add(refs().name);
    for m in batch {
        table.add(m.id.name());
        for tag in m.id.tags() {
            table.add(tag.key);
            table.add(tag.value);
        }
    }

    let mut payload = SmilePayload::new();
    payload.append_unsigned(table.order.len());
    for s in &table.order {
        payload.append_str(s.as_str());
    }

    let common_ids: Vec<usize> = common_tags
        .iter()
        .flat_map(|t| [table.index_of(t.key), table.index_of(t.value)])
        .collect();

    for m in batch {
        let total_tags = m.id.tags().len() + 1 + common_tags.len();
        payload.append_unsigned(total_tags);
        for &index in &common_ids {
            payload.append_unsigned(index);
        }
        for tag in m.id.tags() {
            payload.append_unsigned(table.index_of(tag.key));
            payload.append_unsigned(table.index_of(tag.value));
        }
        payload.append_unsigned(table.index_of(refs().name));
        payload.append_unsigned(table.index_of(m.id.name()));
        payload.append_unsigned(op_for(m.id.tags()) as usize);
        payload.append_double(m.value);
    }
    payload.finish()
}
