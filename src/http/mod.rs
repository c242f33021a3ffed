//! Blocking HTTP client with bounded retries and per-attempt telemetry.

mod client;
mod log_entry;

pub use client::{HttpClient, HttpClientConfig, HttpResponse};

/// The path portion of a URL, used as the `ipc.endpoint` tag.
#[must_use]
pub fn path_from_url(url: &str) -> &str {
    if url.is_empty() {
        return "/";
    }
    let Some(proto_end) = url.find(':') else {
        // no protocol, assume it's already a path
        return url;
    };
    let after_proto = &url[proto_end + 1..];
    if after_proto.len() < 2 || !after_proto.starts_with("//") {
        return url;
    }
    let host_and_path = &after_proto[2..];
    let Some(path_start) = host_and_path.find('/') else {
        return "/";
    };
    let path = &host_and_path[path_start..];
    match path.find('?') {
        Some(query) => &path[..query],
        None => path,
    }
}
