//! Daemon configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// TLS material used when publishing to an external aggregator over mutual
/// TLS. Discovery of these files is the operator's problem; the daemon only
/// consumes the paths.
#[derive(Debug, Clone, Default)]
pub struct CertInfo {
    /// Path to the client certificate (PEM).
    pub ssl_cert: PathBuf,
    /// Path to the client private key (PEM).
    pub ssl_key: PathBuf,
    /// Path to the CA bundle used to verify the server.
    pub ca_info: PathBuf,
    /// Application name presented during verification.
    pub app_name: String,
}

/// Configuration for the registry, publisher, and ingest servers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Process-wide tags prepended to every published measurement.
    pub common_tags: BTreeMap<String, String>,
    /// HTTP read timeout.
    pub read_timeout: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// Maximum number of measurements per published batch.
    pub batch_size: usize,
    /// How often the publisher snapshots and sends measurements.
    pub frequency: Duration,
    /// How often expired meters are swept. Zero disables expiration.
    pub expiration_frequency: Duration,
    /// Expire meters after this period of update inactivity.
    pub meter_ttl: Duration,
    /// Maximum number of distinct age gauges the registry will retain.
    pub age_gauge_limit: usize,
    /// Aggregator endpoint. An empty URI disables publishing.
    pub uri: String,
    /// Process name reported in IPC telemetry (`nf.process`).
    pub process_name: String,
    /// Publish through mutual TLS using [`Config::cert_info`].
    pub external_enabled: bool,
    /// TLS material for external publishing.
    pub cert_info: Option<CertInfo>,
    /// Record publish outcome counters and per-request IPC timers.
    pub status_metrics_enabled: bool,
    /// Log verbose information for each HTTP request.
    pub verbose_http: bool,
    /// While this file exists, publishing is suspended. `None` means always
    /// enabled.
    pub disabled_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            common_tags: BTreeMap::new(),
            read_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(2),
            batch_size: 10_000,
            frequency: Duration::from_secs(5),
            expiration_frequency: Duration::from_secs(60),
            meter_ttl: Duration::from_secs(15 * 60),
            age_gauge_limit: 1000,
            uri: String::new(),
            process_name: String::from("spectatord"),
            external_enabled: false,
            cert_info: None,
            status_metrics_enabled: true,
            verbose_http: false,
            disabled_file: None,
        }
    }
}

impl Config {
    /// Whether the publisher should send at all. Operators can suspend
    /// publishing by creating the configured sentinel file.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match &self.disabled_file {
            Some(path) => !path.exists(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn enabled_without_sentinel() {
        let cfg = Config::default();
        assert!(cfg.is_enabled());
    }

    #[test]
    fn disabled_while_sentinel_exists() {
        let dir = std::env::temp_dir().join("spectatord-test-disabled");
        std::fs::write(&dir, b"x").unwrap();
        let cfg = Config {
            disabled_file: Some(dir.clone()),
            ..Config::default()
        };
        assert!(!cfg.is_enabled());
        std::fs::remove_file(&dir).unwrap();
        assert!(cfg.is_enabled());
    }
}
