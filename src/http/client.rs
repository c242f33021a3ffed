use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Method;
use tracing::{debug, info};

use super::log_entry::LogEntry;
use crate::config::CertInfo;
use crate::registry::Registry;
use crate::DaemonResult;

/// Content type of the binary publish payload.
pub const SMILE_CONTENT_TYPE: &str = "application/x-jackson-smile";

/// Options for the blocking HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed for the exchange once connected.
    pub read_timeout: Duration,
    /// Capture response bodies (needed to classify aggregator errors).
    pub read_body: bool,
    /// Log connection-level details for each request.
    pub verbose_requests: bool,
    /// Record per-attempt IPC timers.
    pub status_metrics_enabled: bool,
    /// Present a client certificate from `cert_info`.
    pub external_enabled: bool,
    /// TLS material for external publishing.
    pub cert_info: Option<CertInfo>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(3),
            read_body: true,
            verbose_requests: false,
            status_metrics_enabled: true,
            external_enabled: false,
            cert_info: None,
        }
    }
}

/// Response surfaced to callers. Transport failures appear as status `-1`
/// with an empty body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status, or `-1` after transport-level failure.
    pub status: i32,
    /// Response body (empty unless `read_body` is set).
    pub body: String,
}

impl HttpResponse {
    /// A synthetic transport-failure response.
    #[must_use]
    pub fn transport_failure() -> Self {
        Self {
            status: -1,
            body: String::new(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn is_retryable(status: i32) -> bool {
    status == 429 || status / 100 == 5
}

/// Synchronous HTTP client. One instance holds one connection pool; the
/// pool survives individual requests, so a publisher reusing a client across
/// ticks keeps its connections warm.
pub struct HttpClient {
    client: reqwest::blocking::Client,
    registry: Arc<Registry>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Build a client. Fails if the TLS material cannot be loaded.
    pub fn new(registry: Arc<Registry>, config: HttpClientConfig) -> DaemonResult<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.connect_timeout + config.read_timeout)
            .pool_max_idle_per_host(4)
            .user_agent(concat!("spectatord/", env!("CARGO_PKG_VERSION")))
            .connection_verbose(config.verbose_requests);

        if config.external_enabled {
            if let Some(cert_info) = &config.cert_info {
                builder = Self::configure_mutual_tls(builder, cert_info)?;
            }
        }

        Ok(Self {
            client: builder.build()?,
            registry,
            config,
        })
    }

    fn configure_mutual_tls(
        builder: reqwest::blocking::ClientBuilder,
        cert_info: &CertInfo,
    ) -> DaemonResult<reqwest::blocking::ClientBuilder> {
        let mut identity_pem = std::fs::read(&cert_info.ssl_cert)?;
        identity_pem.extend_from_slice(&std::fs::read(&cert_info.ssl_key)?);
        let identity = reqwest::Identity::from_pem(&identity_pem)?;
        let ca = reqwest::Certificate::from_pem(&std::fs::read(&cert_info.ca_info)?)?;
        Ok(builder
            .identity(identity)
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca))
    }

    /// GET a URL.
    pub fn get(&self, url: &str) -> HttpResponse {
        self.perform(&Method::GET, url, None)
    }

    /// POST a gzipped smile payload.
    pub fn post_smile(&self, url: &str, payload: Vec<u8>) -> HttpResponse {
        self.perform(&Method::POST, url, Some(payload))
    }

    fn perform(&self, method: &Method, url: &str, payload: Option<Vec<u8>>) -> HttpResponse {
        let total_timeout = self.config.connect_timeout + self.config.read_timeout;
        let status_metrics = self.config.status_metrics_enabled;
        let mut attempt: u32 = 0;

        loop {
            let mut entry = LogEntry::new(&self.registry, method.as_str(), url);
            let mut request = self.client.request(method.clone(), url);
            if let Some(body) = &payload {
                request = request
                    .header(CONTENT_TYPE, SMILE_CONTENT_TYPE)
                    .header(CONTENT_ENCODING, "gzip")
                    .body(body.clone());
            }

            match request.send() {
                Err(err) => {
                    let kind = if err.is_timeout() {
                        "timeout"
                    } else if err.is_connect() {
                        "connection_error"
                    } else {
                        "unknown"
                    };
                    info!("Failed to {method} {url}: {err}");
                    entry.set_error(kind);

                    // retry connect failures while inside the total budget;
                    // a read timeout has already consumed it
                    let elapsed = entry.start().elapsed();
                    if elapsed < total_timeout && attempt < 2 {
                        entry.set_attempt(attempt, false);
                        entry.log(status_metrics);
                        attempt += 1;
                        continue;
                    }

                    entry.set_status_code(-1);
                    entry.set_attempt(attempt, true);
                    entry.log(status_metrics);
                    return HttpResponse::transport_failure();
                }
                Ok(response) => {
                    let status = i32::from(response.status().as_u16());
                    entry.set_status_code(status);
                    if (200..300).contains(&status) {
                        entry.set_success();
                    } else {
                        entry.set_error("http_error");
                    }

                    if is_retryable(status) && attempt < 2 {
                        info!("Got a retryable http code from {url}: {status} (attempt {attempt})");
                        entry.set_attempt(attempt, false);
                        entry.log(status_metrics);
                        let backoff = Duration::from_millis(200u64 << attempt);
                        std::thread::sleep(backoff);
                        attempt += 1;
                        continue;
                    }

                    debug!("{method} {url} - status code: {status}");
                    let body = if self.config.read_body {
                        response.text().unwrap_or_default()
                    } else {
                        String::new()
                    };
                    entry.set_attempt(attempt, true);
                    entry.log(status_metrics);
                    return HttpResponse { status, body };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpClient, HttpClientConfig};
    use crate::config::Config;
    use crate::intern::intern;
    use crate::registry::Registry;
    use std::sync::Arc;
    use std::time::Duration;

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[test]
    fn connection_errors_retry_then_surface_as_minus_one() {
        let registry = Arc::new(Registry::new(Config::default()));
        let client = HttpClient::new(
            registry.clone(),
            HttpClientConfig {
                connect_timeout: Duration::from_millis(250),
                read_timeout: Duration::from_millis(250),
                ..HttpClientConfig::default()
            },
        )
        .unwrap();

        let url = format!("http://127.0.0.1:{}/api/v4/update", closed_port());
        let response = client.post_smile(&url, vec![1, 2, 3]);
        assert_eq!(response.status, -1);
        assert!(response.body.is_empty());

        // three attempts recorded: initial, second, third_up
        let ms = registry.measurements();
        let attempts: std::collections::HashSet<_> = ms
            .iter()
            .filter(|m| m.id.name() == intern("ipc.client.call"))
            .filter_map(|m| m.id.tags().at(intern("ipc.attempt")))
            .map(|s| s.as_str())
            .collect();
        assert!(attempts.contains("initial"));
        assert!(attempts.contains("second"));
        assert!(attempts.contains("third_up"));
    }
}
