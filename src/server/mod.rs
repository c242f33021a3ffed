//! Ingest servers and background upkeep.
//!
//! Datagrams arrive over UDP (native and optionally statsd) and a UNIX
//! datagram socket; each receive loop runs on its own thread and hands every
//! datagram to the parser exactly once. A separate upkeep task publishes
//! self-metrics every 30 seconds and aborts the process if publishing has
//! been stuck for more than a minute.

mod expiring_cache;
#[cfg(unix)]
mod local;
mod parser;
mod proc_net;
mod statsd;
mod udp;

use std::net::{Ipv4Addr, Ipv6Addr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, tick, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::clock;
use crate::id::Id;
use crate::intern::pool_stats;
use crate::meters::{Counter, PercentileDistributionSummary, PercentileTimer};
use crate::registry::Registry;
use crate::tags::Tags;
use crate::DaemonResult;
use expiring_cache::ExpiringCache;

const UPKEEP_FREQUENCY: Duration = Duration::from_secs(30);
const STUCK_AFTER_SECONDS: f64 = 60.0;

const PERC_TIMER_MIN: Duration = Duration::from_nanos(1);
const PERC_TIMER_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Listener configuration for the ingest servers.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port for the native line protocol.
    pub port: u16,
    /// Bind only an IPv4 socket instead of a dual-stack IPv6 one.
    pub ipv4_only: bool,
    /// Port for the statsd protocol, if enabled.
    pub statsd_port: Option<u16>,
    /// Path for the UNIX datagram socket, if enabled.
    pub socket_path: Option<PathBuf>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 1234,
            ipv4_only: false,
            statsd_port: None,
            socket_path: None,
        }
    }
}

#[derive(Default)]
struct ServerTasks {
    upkeep_shutdown: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

/// The ingest side of the daemon: line parsing, sockets, and upkeep.
pub struct Server {
    registry: Arc<Registry>,
    options: ServerOptions,
    parsed_count: Arc<Counter>,
    parse_errors: Arc<Counter>,
    perc_timers: ExpiringCache<PercentileTimer>,
    perc_dist_summaries: ExpiringCache<PercentileDistributionSummary>,
    shutdown: Arc<AtomicBool>,
    tasks: Mutex<ServerTasks>,
}

impl Server {
    /// Create a server bound to nothing yet; [`Server::start`] opens the
    /// sockets.
    #[must_use]
    pub fn new(registry: Arc<Registry>, options: ServerOptions) -> Self {
        Self {
            parsed_count: registry.get_counter(Id::of("spectatord.parsedCount", Tags::new())),
            parse_errors: registry.get_counter(Id::of("spectatord.parseErrors", Tags::new())),
            registry,
            options,
            perc_timers: ExpiringCache::new(),
            perc_dist_summaries: ExpiringCache::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(ServerTasks::default()),
        }
    }

    /// Parse a native-protocol datagram. Returns the aggregated per-line
    /// error messages, if any line failed.
    pub fn parse(&self, buffer: &str) -> Option<String> {
        self.parse_lines(buffer, |line| self.parse_line(line))
    }

    /// Parse a statsd datagram.
    pub fn parse_statsd(&self, buffer: &str) -> Option<String> {
        self.parse_lines(buffer, |line| self.parse_statsd_line(line))
    }

    fn parse_lines(
        &self,
        buffer: &str,
        parse_one: impl Fn(&str) -> Result<(), String>,
    ) -> Option<String> {
        let mut err_msg = String::new();
        for line in buffer.split('\n') {
            if line.is_empty() {
                continue;
            }
            match parse_one(line) {
                Ok(()) => self.parsed_count.increment(),
                Err(message) => {
                    self.parse_errors.increment();
                    if !err_msg.is_empty() {
                        err_msg.push('\n');
                    }
                    err_msg.push_str(&message);
                }
            }
        }
        if err_msg.is_empty() {
            None
        } else {
            Some(err_msg)
        }
    }

    pub(crate) fn percentile_timer(&self, id: Id) -> Arc<PercentileTimer> {
        self.perc_timers.get_or_create(&id, |id| {
            PercentileTimer::new(&self.registry, id, PERC_TIMER_MIN, PERC_TIMER_MAX)
        })
    }

    pub(crate) fn percentile_dist_summary(&self, id: Id) -> Arc<PercentileDistributionSummary> {
        self.perc_dist_summaries.get_or_create(&id, |id| {
            PercentileDistributionSummary::new(&self.registry, id, i64::MIN, i64::MAX)
        })
    }

    /// Open the sockets and start the receive loops and the upkeep task.
    pub fn start(self: &Arc<Self>) -> DaemonResult<()> {
        self.registry
            .get_age_gauge(Id::of("spectatord.uptime", Tags::new()))
            .update_last_success(clock::unix_nanos());

        info!("starting janitorial tasks");
        let mut tasks = self.tasks.lock();
        let (upkeep_tx, upkeep_rx) = bounded::<()>(1);
        tasks.upkeep_shutdown = Some(upkeep_tx);
        let upkeep_server = Arc::clone(self);
        tasks
            .threads
            .push(std::thread::spawn(move || upkeep_server.upkeep_loop(&upkeep_rx)));

        info!("using receive buffer size = {}", proc_net::max_buffer_size());

        let socket = bind_udp(self.options.port, self.options.ipv4_only)?;
        info!("starting spectatord server on port {}", self.options.port);
        let server = Arc::clone(self);
        tasks.threads.push(udp::spawn_receive_loop(
            socket,
            self.shutdown.clone(),
            move |text| {
                if let Some(errors) = server.parse(text) {
                    debug!("native protocol parse errors: {errors}");
                }
            },
        ));

        if let Some(statsd_port) = self.options.statsd_port {
            let socket = bind_udp(statsd_port, self.options.ipv4_only)?;
            info!("starting statsd server on port {statsd_port}");
            let server = Arc::clone(self);
            tasks.threads.push(udp::spawn_receive_loop(
                socket,
                self.shutdown.clone(),
                move |text| {
                    if let Some(errors) = server.parse_statsd(text) {
                        debug!("statsd parse errors: {errors}");
                    }
                },
            ));
        } else {
            info!("statsd support is not enabled");
        }

        #[cfg(unix)]
        if let Some(path) = self.options.socket_path.clone() {
            let socket = local::bind_socket(&path)?;
            info!("starting local server (dgram) on socket {}", path.display());
            let server = Arc::clone(self);
            tasks.threads.push(local::spawn_receive_loop(
                socket,
                self.shutdown.clone(),
                move |text| {
                    if let Some(errors) = server.parse(text) {
                        debug!("local socket parse errors: {errors}");
                    }
                },
            ));
        }

        Ok(())
    }

    /// Block until [`Server::stop`] is called from another thread.
    pub fn wait(&self) {
        let threads = std::mem::take(&mut self.tasks.lock().threads);
        for thread in threads {
            let _ = thread.join();
        }
    }

    /// Signal every loop to exit and join them.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let (upkeep, threads) = {
            let mut tasks = self.tasks.lock();
            (tasks.upkeep_shutdown.take(), std::mem::take(&mut tasks.threads))
        };
        drop(upkeep);
        for thread in threads {
            let _ = thread.join();
        }
    }

    fn ensure_not_stuck(&self) {
        let elapsed =
            (clock::unix_nanos() - self.registry.last_success_time()) as f64 / 1e9;
        if elapsed > STUCK_AFTER_SECONDS {
            error!(
                "too long since we were able to send metrics successfully: {elapsed:.1} > 60s, aborting"
            );
            std::process::abort();
        }
        debug!("last batch of metrics was sent successfully {elapsed:.1} seconds ago");
    }

    fn upkeep_loop(&self, shutdown: &Receiver<()>) {
        let registry = &self.registry;
        let timer_tags = Tags::of(&[("id", "timer")]);
        let ds_tags = Tags::of(&[("id", "dist-summary")]);
        let timers_size =
            registry.get_gauge(Id::of("spectator.percentileCacheSize", timer_tags.clone()));
        let ds_size = registry.get_gauge(Id::of("spectator.percentileCacheSize", ds_tags.clone()));
        let timers_expired =
            registry.get_counter(Id::of("spectator.percentileExpired", timer_tags));
        let ds_expired = registry.get_counter(Id::of("spectator.percentileExpired", ds_tags));
        let pool_hits = registry
            .get_monotonic_counter(Id::of("spectatord.poolAccess", Tags::of(&[("id", "hit")])));
        let pool_misses = registry
            .get_monotonic_counter(Id::of("spectatord.poolAccess", Tags::of(&[("id", "miss")])));
        let pool_alloc_size = registry.get_gauge(Id::of("spectatord.poolAllocSize", Tags::new()));
        let pool_entries = registry.get_gauge(Id::of("spectatord.poolEntries", Tags::new()));
        let udp_dropped = registry
            .get_monotonic_counter_uint(Id::of("spectator.udpPacketsDropped", Tags::new()));
        let udp_queue = registry.get_max_gauge(Id::of("spectator.udpRxQueue", Tags::new()));

        let ticker = tick(UPKEEP_FREQUENCY);
        loop {
            select! {
                recv(ticker) -> _ => {
                    self.ensure_not_stuck();

                    let (t_size, t_expired) = self.perc_timers.expire();
                    let (d_size, d_expired) = self.perc_dist_summaries.expire();
                    timers_size.set(t_size as f64);
                    ds_size.set(d_size as f64);
                    timers_expired.add(t_expired as f64);
                    ds_expired.add(d_expired as f64);

                    if let Some(net) = proc_net::udp_info(self.options.port) {
                        udp_dropped.set(net.num_dropped);
                        udp_queue.update(net.rx_queue_bytes as f64);
                    }

                    let stats = pool_stats();
                    pool_hits.set(stats.hits as f64);
                    pool_misses.set(stats.misses as f64);
                    pool_alloc_size.set(stats.alloc_size as f64);
                    pool_entries.set(stats.table_size as f64);
                    debug!(
                        "Str Pool: Hits {} Misses {} Size {} Alloc {}",
                        stats.hits, stats.misses, stats.table_size, stats.alloc_size
                    );
                }
                recv(shutdown) -> _ => break,
            }
        }
        debug!("stopping upkeep");
    }
}

fn bind_udp(port: u16, ipv4_only: bool) -> DaemonResult<UdpSocket> {
    let socket = if ipv4_only {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?
    } else {
        UdpSocket::bind((Ipv6Addr::UNSPECIFIED, port))?
    };
    #[cfg(unix)]
    if let Err(err) =
        rustix::net::sockopt::set_socket_recv_buffer_size(&socket, proc_net::max_buffer_size())
    {
        tracing::warn!("unable to set max receive buffer size: {err}");
    }
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}
