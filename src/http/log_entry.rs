use std::sync::Arc;
use std::time::{Duration, Instant};

use super::path_from_url;
use crate::id::Id;
use crate::intern::intern;
use crate::meters::PercentileTimer;
use crate::registry::Registry;
use crate::tags::Tags;

/// Telemetry for one HTTP attempt, recorded under `ipc.client.call` when the
/// attempt completes.
pub(crate) struct LogEntry {
    registry: Arc<Registry>,
    start: Instant,
    id: Id,
}

impl LogEntry {
    pub fn new(registry: &Arc<Registry>, method: &str, url: &str) -> Self {
        let process = registry.config().process_name.clone();
        Self {
            registry: registry.clone(),
            start: Instant::now(),
            id: Id::of(
                "ipc.client.call",
                Tags::of(&[
                    ("owner", "spectatord"),
                    ("ipc.endpoint", path_from_url(url)),
                    ("http.method", method),
                    ("http.status", "-1"),
                    ("nf.process", process.as_str()),
                ]),
            ),
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn set_status_code(&mut self, code: i32) {
        self.id = self
            .id
            .with_tag(intern("http.status"), intern(&code.to_string()));
    }

    pub fn set_attempt(&mut self, attempt_number: u32, is_final: bool) {
        let attempt = match attempt_number {
            0 => "initial",
            1 => "second",
            _ => "third_up",
        };
        self.id = self
            .id
            .with_tag(intern("ipc.attempt"), intern(attempt))
            .with_tag(
                intern("ipc.attempt.final"),
                intern(if is_final { "true" } else { "false" }),
            );
    }

    pub fn set_error(&mut self, error: &str) {
        self.id = self
            .id
            .with_tag(intern("ipc.result"), intern("failure"))
            .with_tag(intern("ipc.status"), intern(error));
    }

    pub fn set_success(&mut self) {
        self.id = self
            .id
            .with_tag(intern("ipc.result"), intern("success"))
            .with_tag(intern("ipc.status"), intern("success"));
    }

    pub fn log(&self, status_metrics_enabled: bool) {
        if !status_metrics_enabled {
            return;
        }
        let timer = PercentileTimer::new(
            &self.registry,
            self.id.clone(),
            Duration::from_millis(1),
            Duration::from_secs(10),
        );
        timer.record(self.start.elapsed());
    }
}
