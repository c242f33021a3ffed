use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use spectatord::server::ServerOptions;
use spectatord::{Config, Registry, Server};

fn new_server() -> Server {
    let registry = Arc::new(Registry::new(Config::default()));
    Server::new(registry, ServerOptions::default())
}

fn bench_parse(c: &mut Criterion) {
    let server = new_server();
    c.bench_function("parse_counter_line", |b| {
        b.iter(|| server.parse("c:ipc.client.call,id=dropped:1\n"));
    });

    c.bench_function("parse_timer_batch", |b| {
        b.iter(|| {
            server.parse(
                "t:server.requestLatency:0.042\n\
                 d:server.responseSize:512\n\
                 c:server.requests,status=200,method=GET:1\n",
            );
        });
    });

    c.bench_function("parse_statsd_line", |b| {
        b.iter(|| server.parse_statsd("page.views:1|c|@0.5|#region:east,zone:1a\n"));
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
