//! Admin HTTP server.
//!
//! A small localhost-oriented surface for introspection and runtime
//! reconfiguration. Read endpoints are open; mutating endpoints (POST,
//! DELETE) only accept requests addressed to localhost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tiny_http::{Header, Method, Request, Response};
use tracing::{debug, error, info};

use crate::error::DaemonError;
use crate::id::Id;
use crate::intern::intern;
use crate::registry::Registry;
use crate::tags::Tags;
use crate::DaemonResult;

/// Common tags that may be modified through the admin surface.
pub const ALLOWED_COMMON_TAGS: [&str; 6] = [
    "mantisJobId",
    "mantisJobName",
    "mantisUser",
    "mantisWorkerIndex",
    "mantisWorkerNumber",
    "mantisWorkerStageNumber",
];

/// A running admin server; dropping or stopping it shuts the listener down.
pub struct AdminServer {
    port: u16,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AdminServer {
    /// Bind the admin port and serve requests on a background thread.
    pub fn start(registry: Arc<Registry>, port: u16) -> DaemonResult<Self> {
        let server = tiny_http::Server::http(("0.0.0.0", port))
            .map_err(|err| DaemonError::Custom(format!("admin server bind failed: {err}")))?;
        let port = server
            .server_addr()
            .to_ip()
            .map_or(port, |addr| addr.port());
        info!("starting admin server on port {port}");

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let thread = std::thread::spawn(move || {
            while !shutdown_flag.load(Ordering::Relaxed) {
                match server.recv_timeout(Duration::from_millis(500)) {
                    Ok(Some(request)) => handle_request(&registry, request),
                    Ok(None) => {}
                    Err(err) => {
                        error!("admin server receive error: {err}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            port,
            shutdown,
            thread: Some(thread),
        })
    }

    /// The port the listener is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop serving and join the listener thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AdminServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn json_response(status: u16, body: &Value) -> Response<std::io::Cursor<Vec<u8>>> {
    let response = Response::from_string(body.to_string()).with_status_code(status);
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn empty_response(status: u16) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(String::new()).with_status_code(status)
}

fn is_localhost(request: &Request) -> bool {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Host"))
        .map_or(false, |h| {
            let host = h.value.as_str();
            host.contains("localhost") || host.contains("127.0.0.1") || host.contains("[::1]")
        })
}

fn handle_request(registry: &Arc<Registry>, mut request: Request) {
    debug!(
        "admin request method={} url={}",
        request.method(),
        request.url()
    );
    let url = request.url().to_string();
    let method = request.method().clone();

    let response = match (&method, url.as_str()) {
        (Method::Get, "/") => get_root(),
        (Method::Get, "/config") => get_config(registry),
        (Method::Get, "/config/common_tags") => get_common_tags_usage(),
        (Method::Post, "/config/common_tags") => {
            if is_localhost(&request) {
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                post_common_tags(registry, &body)
            } else {
                localhost_only(&request, &url)
            }
        }
        (Method::Get, "/metrics") => get_metrics(registry),
        (Method::Delete, path)
            if path == "/metrics/A" || path.starts_with("/metrics/A/") =>
        {
            if is_localhost(&request) {
                delete_metrics(registry, "A", path)
            } else {
                localhost_only(&request, &url)
            }
        }
        (Method::Delete, path)
            if path == "/metrics/g" || path.starts_with("/metrics/g/") =>
        {
            if is_localhost(&request) {
                delete_metrics(registry, "g", path)
            } else {
                localhost_only(&request, &url)
            }
        }
        _ => empty_response(404),
    };
    let _ = request.respond(response);
}

fn localhost_only(request: &Request, url: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    error!(
        "admin endpoint may only be accessed from localhost method={} url={url}",
        request.method()
    );
    empty_response(400)
}

fn get_root() -> Response<std::io::Cursor<Vec<u8>>> {
    let body = json!({
        "description": format!("SpectatorD Admin Server {}", env!("CARGO_PKG_VERSION")),
        "endpoints": ["/", "/config", "/config/common_tags", "/metrics"],
    });
    json_response(200, &body)
}

fn get_config(registry: &Arc<Registry>) -> Response<std::io::Cursor<Vec<u8>>> {
    let cfg = registry.config();
    let mut common_tags = Map::new();
    for tag in registry.common_tags().iter() {
        common_tags.insert(tag.key.to_string(), Value::from(tag.value.as_str()));
    }
    let body = json!({
        "age_gauge_limit": cfg.age_gauge_limit,
        "batch_size": cfg.batch_size,
        "common_tags": common_tags,
        "connect_timeout": cfg.connect_timeout.as_millis() as u64,
        "expiration_frequency": cfg.expiration_frequency.as_millis() as u64,
        "external_enabled": cfg.external_enabled,
        "frequency": cfg.frequency.as_millis() as u64,
        "meter_ttl": cfg.meter_ttl.as_millis() as u64,
        "read_timeout": cfg.read_timeout.as_millis() as u64,
        "status_metrics_enabled": cfg.status_metrics_enabled,
        "uri": cfg.uri,
    });
    json_response(200, &body)
}

fn get_common_tags_usage() -> Response<std::io::Cursor<Vec<u8>>> {
    let usage = format!(
        "To configure common tags, POST a JSON object to this endpoint with \
         key-value pairs defining the desired common tags. To delete a tag, set \
         the value to an empty string. Attempting to configure any other tags \
         besides the allowed set will return an error. Only the following tags \
         may be modified: {}.",
        ALLOWED_COMMON_TAGS.join(", ")
    );
    json_response(200, &json!({ "usage": usage }))
}

fn post_common_tags(registry: &Arc<Registry>, body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            error!("POST /config/common_tags json parse error: {err}");
            return json_response(400, &json!({"message": "json parse exception"}));
        }
    };
    let Some(object) = parsed.as_object() else {
        return json_response(400, &json!({"message": "expected a json object"}));
    };

    for (key, value) in object {
        if !ALLOWED_COMMON_TAGS.contains(&key.as_str()) {
            return json_response(400, &json!({"message": "only allowed tags may be set"}));
        }
        if !value.is_string() {
            return json_response(400, &json!({"message": "tag values must be strings"}));
        }
    }

    for (key, value) in object {
        let value = value.as_str().unwrap_or_default();
        if value.is_empty() {
            info!("delete common tag {key}");
            registry.erase_common_tag(key);
        } else {
            info!("update common tag {key}={value}");
            registry.update_common_tag(key, value);
        }
    }
    json_response(200, &json!({"message": "common tags updated"}))
}

fn meter_entry(id: &Id, value: &str) -> Value {
    let mut tags = Map::new();
    for tag in id.tags() {
        tags.insert(tag.key.to_string(), Value::from(tag.value.as_str()));
    }
    json!({
        "name": id.name().as_str(),
        "tags": tags,
        "value": value,
    })
}

fn get_metrics(registry: &Arc<Registry>) -> Response<std::io::Cursor<Vec<u8>>> {
    use crate::meters::Meter;

    let age_gauges: Vec<Value> = registry
        .age_gauges()
        .iter()
        .map(|m| meter_entry(m.meter_id(), &m.value().to_string()))
        .collect();
    let counters: Vec<Value> = registry
        .counters()
        .iter()
        .map(|m| meter_entry(m.meter_id(), &m.count().to_string()))
        .collect();
    let dist_summaries: Vec<Value> = registry
        .dist_summaries()
        .iter()
        .map(|m| meter_entry(m.meter_id(), &m.total_amount().to_string()))
        .collect();
    let gauges: Vec<Value> = registry
        .gauges()
        .iter()
        .map(|m| meter_entry(m.meter_id(), &m.get().to_string()))
        .collect();
    let max_gauges: Vec<Value> = registry
        .max_gauges()
        .iter()
        .map(|m| meter_entry(m.meter_id(), &m.get().to_string()))
        .collect();
    let mono_counters: Vec<Value> = registry
        .monotonic_counters()
        .iter()
        .map(|m| meter_entry(m.meter_id(), &m.delta().to_string()))
        .collect();
    let mono_counters_uint: Vec<Value> = registry
        .monotonic_counters_uint()
        .iter()
        .map(|m| meter_entry(m.meter_id(), &m.delta().to_string()))
        .collect();
    let timers: Vec<Value> = registry
        .timers()
        .iter()
        .map(|m| meter_entry(m.meter_id(), &m.total_time().to_string()))
        .collect();

    let total = age_gauges.len()
        + counters.len()
        + dist_summaries.len()
        + gauges.len()
        + max_gauges.len()
        + mono_counters.len()
        + mono_counters_uint.len()
        + timers.len();
    let stats = json!({
        "age_gauges.size": age_gauges.len(),
        "counters.size": counters.len(),
        "dist_summaries.size": dist_summaries.len(),
        "gauges.size": gauges.len(),
        "max_gauges.size": max_gauges.len(),
        "mono_counters.size": mono_counters.len(),
        "mono_counters_uint.size": mono_counters_uint.len(),
        "timers.size": timers.len(),
        "total.size": total,
    });

    let body = json!({
        "age_gauges": age_gauges,
        "counters": counters,
        "dist_summaries": dist_summaries,
        "gauges": gauges,
        "max_gauges": max_gauges,
        "mono_counters": mono_counters,
        "mono_counters_uint": mono_counters_uint,
        "timers": timers,
        "stats": stats,
    });
    json_response(200, &body)
}

/// Parse a `name[,k=v[,k=v...]]` meter id. The scan is deliberately
/// permissive: a trailing segment without `=` silently ends the tag list, so
/// malformed ids simply fail to match anything.
pub(crate) fn parse_id(id_str: &str) -> Id {
    let Some(comma) = id_str.find(',') else {
        return Id::of(id_str, Tags::new());
    };
    let name = &id_str[..comma];
    let mut tags = Tags::new();
    let mut pos = comma;
    while pos < id_str.len() {
        pos += 1;
        let Some(eq_rel) = id_str[pos..].find('=') else {
            break;
        };
        let key = &id_str[pos..pos + eq_rel];
        let val_start = pos + eq_rel + 1;
        match id_str[val_start..].find(',') {
            Some(end_rel) => {
                tags.add(intern(key), intern(&id_str[val_start..val_start + end_rel]));
                pos = val_start + end_rel;
            }
            None => {
                tags.add(intern(key), intern(&id_str[val_start..]));
                break;
            }
        }
    }
    Id::of(name, tags)
}

fn delete_metrics(
    registry: &Arc<Registry>,
    meter_type: &str,
    path: &str,
) -> Response<std::io::Cursor<Vec<u8>>> {
    let prefix_len = "/metrics/".len() + meter_type.len() + 1;
    if path.len() < prefix_len {
        info!("DELETE /metrics/{meter_type} succeeded: all meters deleted");
        registry.delete_all_meters(meter_type);
        return empty_response(200);
    }
    let id = parse_id(&path[prefix_len..]);
    if registry.delete_meter(meter_type, &id) {
        info!("DELETE /metrics/{meter_type} succeeded: '{id}'");
        empty_response(200)
    } else {
        error!("DELETE /metrics/{meter_type} failed: meter not found '{id}'");
        empty_response(404)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_id;
    use crate::id::Id;
    use crate::intern::intern;
    use crate::tags::Tags;

    #[test]
    fn plain_name() {
        let id = parse_id("server.requests");
        assert_eq!(id, Id::of("server.requests", Tags::new()));
    }

    #[test]
    fn name_with_tags() {
        let id = parse_id("server.requests,zone=1a,region=east");
        assert_eq!(
            id,
            Id::of(
                "server.requests",
                Tags::of(&[("zone", "1a"), ("region", "east")])
            )
        );
    }

    #[test]
    fn trailing_garbage_partially_parses() {
        let id = parse_id("m,k=v,junk");
        assert_eq!(id, Id::of("m", Tags::of(&[("k", "v")])));

        // an '=' past a comma mangles the key rather than erroring
        let id = parse_id("m,x,k=v");
        assert_eq!(id.tags().len(), 1);
        assert_eq!(id.tags().at(intern("x_k")), Some(intern("v")));
    }

    #[test]
    fn trailing_comma_is_ignored() {
        let id = parse_id("m,k=v,");
        assert_eq!(id, Id::of("m", Tags::of(&[("k", "v")])));
    }
}
