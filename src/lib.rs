//! # spectatord
//!
//! A high-throughput metric aggregation daemon.
//!
//! ## Features
//!
//! - **Line protocols**: a compact native protocol plus statsd, over UDP and
//!   UNIX datagram sockets
//! - **Lock-free aggregation**: meters update through atomics, never locks
//! - **Meter types**: counters, monotonic counters, gauges, max gauges, age
//!   gauges, timers, distribution summaries, and percentile variants
//! - **Batched publishing**: pre-aggregated measurements are smile-encoded,
//!   gzipped, and POSTed to an aggregator service with bounded retries
//! - **Admin surface**: a small localhost HTTP server for introspection and
//!   runtime reconfiguration
//!
//! ## Quick Start
//!
//! ```no_run
//! use spectatord::{Config, Id, Registry, Tags};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::new(Config::default()));
//! Registry::start(&registry);
//!
//! let counter = registry.get_counter(Id::of("server.requests", Tags::new()));
//! counter.increment();
//!
//! registry.stop();
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod admin;
mod clock;
mod compress;
pub mod config;
mod error;
pub mod http;
mod id;
mod intern;
mod measurement;
pub mod meters;
mod publisher;
pub mod registry;
pub mod server;
mod smile;
mod tags;

pub use config::{CertInfo, Config};
pub use error::DaemonError;
pub use id::Id;
pub use intern::{intern, pool_stats, refs, PoolStats, Refs, StrRef};
pub use measurement::Measurement;
pub use registry::Registry;
pub use server::Server;
pub use tags::{Tag, Tags};

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
