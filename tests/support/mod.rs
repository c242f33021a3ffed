//! Shared helpers for the integration suites: a stub aggregator and a
//! decoder for the publish payload.

use std::io::Read;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;

/// One request captured by the stub aggregator.
pub struct CapturedRequest {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub body: Vec<u8>,
}

/// A stub aggregator that answers with a scripted sequence of responses
/// (the last response repeats) and captures every request body.
pub struct StubAggregator {
    pub port: u16,
    pub requests: Receiver<CapturedRequest>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl StubAggregator {
    pub fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let (tx, rx) = channel();
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();

        let thread = std::thread::spawn(move || {
            let mut served = 0usize;
            while !shutdown_flag.load(std::sync::atomic::Ordering::Relaxed) {
                let Ok(Some(mut request)) = server.recv_timeout(Duration::from_millis(50)) else {
                    continue;
                };
                fn header_value(headers: &[tiny_http::Header], name: &'static str) -> Option<String> {
                    headers
                        .iter()
                        .find(|h| h.field.equiv(name))
                        .map(|h| h.value.as_str().to_string())
                }
                let content_type = header_value(request.headers(), "Content-Type");
                let content_encoding = header_value(request.headers(), "Content-Encoding");
                let mut body = Vec::new();
                request.as_reader().read_to_end(&mut body).unwrap();
                let _ = tx.send(CapturedRequest {
                    content_type,
                    content_encoding,
                    body,
                });

                let (status, reply) = responses[served.min(responses.len() - 1)];
                served += 1;
                let response =
                    tiny_http::Response::from_string(reply).with_status_code(status);
                let _ = request.respond(response);
            }
        });

        Self {
            port,
            requests: rx,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn uri(&self) -> String {
        format!("http://127.0.0.1:{}/api/v4/update", self.port)
    }
}

impl Drop for StubAggregator {
    fn drop(&mut self) {
        self.shutdown
            .store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A decoded measurement record from a publish payload.
#[derive(Debug)]
pub struct DecodedMeasurement {
    pub tags: std::collections::HashMap<String, String>,
    pub op: u64,
    pub value: f64,
}

/// Decode a gzipped smile payload back into measurement records.
pub fn decode_payload(payload: &[u8]) -> Vec<DecodedMeasurement> {
    let mut bytes = Vec::new();
    flate2::read::GzDecoder::new(payload)
        .read_to_end(&mut bytes)
        .unwrap();

    assert_eq!(&bytes[..4], b":)\n\0", "smile header");
    assert_eq!(bytes[4], 0xF8, "start array");
    assert_eq!(*bytes.last().unwrap(), 0xF9, "end array");
    let mut cursor = 5;
    let bytes = &bytes[..bytes.len() - 1];

    let table_len = read_unsigned(bytes, &mut cursor);
    let mut strings = Vec::with_capacity(table_len as usize);
    for _ in 0..table_len {
        strings.push(read_string(bytes, &mut cursor));
    }

    let mut measurements = Vec::new();
    while cursor < bytes.len() {
        let pair_count = read_unsigned(bytes, &mut cursor);
        let mut tags = std::collections::HashMap::new();
        for _ in 0..pair_count {
            let key = read_unsigned(bytes, &mut cursor) as usize;
            let value = read_unsigned(bytes, &mut cursor) as usize;
            tags.insert(strings[key].clone(), strings[value].clone());
        }
        let op = read_unsigned(bytes, &mut cursor);
        let value = read_double(bytes, &mut cursor);
        measurements.push(DecodedMeasurement { tags, op, value });
    }
    measurements
}

fn read_unsigned(bytes: &[u8], cursor: &mut usize) -> u64 {
    let lead = bytes[*cursor];
    *cursor += 1;
    if (0xC0..0xE0).contains(&lead) {
        return u64::from(lead - 0xC0) >> 1;
    }
    assert_eq!(lead, 0x24, "int token at {}", *cursor - 1);
    let mut value: u64 = 0;
    loop {
        let byte = bytes[*cursor];
        *cursor += 1;
        if byte & 0x80 != 0 {
            value = (value << 6) | u64::from(byte & 0x3F);
            return value >> 1;
        }
        value = (value << 7) | u64::from(byte);
    }
}

fn read_double(bytes: &[u8], cursor: &mut usize) -> f64 {
    assert_eq!(bytes[*cursor], 0x29, "double token");
    *cursor += 1;
    let mut bits: u64 = 0;
    for _ in 0..10 {
        bits = (bits << 7) | u64::from(bytes[*cursor] & 0x7F);
        *cursor += 1;
    }
    f64::from_bits(bits)
}

fn read_string(bytes: &[u8], cursor: &mut usize) -> String {
    let lead = bytes[*cursor];
    *cursor += 1;
    match lead {
        0x20 => String::new(),
        0x40..=0x7F => {
            let len = (lead - 0x40 + 1) as usize;
            let s = String::from_utf8(bytes[*cursor..*cursor + len].to_vec()).unwrap();
            *cursor += len;
            s
        }
        0xE0 => {
            let start = *cursor;
            while bytes[*cursor] != 0xFC {
                *cursor += 1;
            }
            let s = String::from_utf8(bytes[start..*cursor].to_vec()).unwrap();
            *cursor += 1;
            s
        }
        other => panic!("unexpected string token 0x{other:02X}"),
    }
}
