use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use spectatord::admin::AdminServer;
use spectatord::server::ServerOptions;
use spectatord::{CertInfo, Config, Registry, Server};

// everything sent here is dropped by the dev aggregator
const DEV_AGGREGATOR_URI: &str = "http://localhost:7101/api/v4/update";

/// A daemon that listens for metrics and reports them to an aggregator
/// service.
#[derive(Parser, Debug)]
#[command(name = "spectatord", version)]
struct Args {
    /// Port number for the UDP socket.
    #[arg(long, default_value_t = 1234)]
    port: u16,

    /// Bind the metric servers to IPv4 only instead of dual-stack IPv6.
    #[arg(long = "ipv4_only")]
    ipv4_only: bool,

    /// Enable statsd support.
    #[arg(long = "enable_statsd")]
    enable_statsd: bool,

    /// Port number for the statsd socket.
    #[arg(long = "statsd_port", default_value_t = 8125)]
    statsd_port: u16,

    /// Port number for the admin server.
    #[arg(long = "admin_port", default_value_t = 1234)]
    admin_port: u16,

    /// Enable UNIX domain socket support. Defaults to on for Linux and off
    /// elsewhere.
    #[arg(long = "enable_socket", default_value_t = cfg!(target_os = "linux"))]
    enable_socket: bool,

    /// Path to the UNIX domain socket.
    #[arg(long = "socket_path", default_value = "/run/spectatord/spectatord.unix")]
    socket_path: PathBuf,

    /// Override URI for the aggregator. Empty disables publishing.
    #[arg(long, default_value = "")]
    uri: String,

    /// Meter TTL: expire meters after this period of inactivity, in seconds.
    #[arg(long = "meter_ttl", default_value_t = 15 * 60)]
    meter_ttl: u64,

    /// The maximum number of age gauges that may be reported by this process.
    #[arg(long = "age_gauge_limit", default_value_t = 1000)]
    age_gauge_limit: usize,

    /// Common tags applied to all metrics: nf.app=app,nf.cluster=cluster.
    /// This flag should only be used by experts who understand the risks.
    #[arg(long = "common_tags", default_value = "")]
    common_tags: String,

    /// No common tags will be provided for metrics, and no internal status
    /// metrics will be recorded. Only use this feature for special cases
    /// with a secondary spectatord process.
    #[arg(long = "no_common_tags")]
    no_common_tags: bool,

    /// Use verbose logging.
    #[arg(long)]
    verbose: bool,

    /// Output debug info for HTTP requests.
    #[arg(long = "verbose_http")]
    verbose_http: bool,

    /// Debug the daemon: all values are sent to a dev aggregator and
    /// dropped.
    #[arg(long)]
    debug: bool,

    /// Publish through mutual TLS with certificates from --cert_dir.
    #[arg(long = "external_enabled")]
    external_enabled: bool,

    /// Directory holding client.crt, client.key, and ca.crt for external
    /// publishing.
    #[arg(long = "cert_dir")]
    cert_dir: Option<PathBuf>,
}

fn parse_common_tags(spec: &str) -> Result<BTreeMap<String, String>, String> {
    let mut tags = BTreeMap::new();
    if spec.is_empty() {
        return Ok(tags);
    }
    for pair in spec.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("expected key=value, got '{pair}'"));
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return Err(format!("empty key or value in '{pair}'"));
        }
        tags.insert(key.to_string(), value.to_string());
    }
    Ok(tags)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let common_tags = if args.no_common_tags {
        BTreeMap::new()
    } else {
        match parse_common_tags(&args.common_tags) {
            Ok(tags) => tags,
            Err(err) => {
                eprintln!("invalid --common_tags: {err}");
                return ExitCode::from(2);
            }
        }
    };

    let uri = if args.debug {
        DEV_AGGREGATOR_URI.to_string()
    } else {
        args.uri.clone()
    };

    let cert_info = args.cert_dir.as_ref().map(|dir| CertInfo {
        ssl_cert: dir.join("client.crt"),
        ssl_key: dir.join("client.key"),
        ca_info: dir.join("ca.crt"),
        app_name: String::from("spectatord"),
    });

    let config = Config {
        common_tags,
        meter_ttl: Duration::from_secs(args.meter_ttl),
        age_gauge_limit: args.age_gauge_limit,
        uri,
        external_enabled: args.external_enabled,
        cert_info,
        status_metrics_enabled: !args.no_common_tags,
        verbose_http: args.verbose_http,
        disabled_file: std::env::var_os("SPECTATORD_DISABLED_FILE").map(PathBuf::from),
        ..Config::default()
    };

    let registry = Arc::new(Registry::new(config));
    Registry::start(&registry);

    let options = ServerOptions {
        port: args.port,
        ipv4_only: args.ipv4_only,
        statsd_port: args.enable_statsd.then_some(args.statsd_port),
        socket_path: args.enable_socket.then(|| args.socket_path.clone()),
    };
    let server = Arc::new(Server::new(registry.clone(), options));
    if let Err(err) = server.start() {
        error!("unable to start ingest servers: {err}");
        return ExitCode::FAILURE;
    }

    let _admin = match AdminServer::start(registry.clone(), args.admin_port) {
        Ok(admin) => admin,
        Err(err) => {
            error!("unable to start admin server: {err}");
            return ExitCode::FAILURE;
        }
    };

    server.wait();
    registry.stop();
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::parse_common_tags;

    #[test]
    fn parses_tag_pairs() {
        let tags = parse_common_tags("nf.app=www,nf.cluster=www-main").unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags["nf.app"], "www");
        assert_eq!(tags["nf.cluster"], "www-main");
    }

    #[test]
    fn empty_spec_is_empty() {
        assert!(parse_common_tags("").unwrap().is_empty());
    }

    #[test]
    fn malformed_specs_error() {
        assert!(parse_common_tags("nf.app").is_err());
        assert!(parse_common_tags("nf.app=").is_err());
        assert!(parse_common_tags("=www").is_err());
        assert!(parse_common_tags("a=b,,c=d").is_err());
    }
}
