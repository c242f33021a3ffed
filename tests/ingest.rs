//! Datagram-to-measurement flow over a real UDP socket.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

use spectatord::server::ServerOptions;
use spectatord::{intern, Config, Registry, Server};

fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    drop(socket);
    port
}

fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = probe() {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for metrics");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn native_and_statsd_datagrams_update_the_registry() {
    let registry = Arc::new(Registry::new(Config::default()));
    let port = free_udp_port();
    let statsd_port = free_udp_port();
    let server = Arc::new(Server::new(
        registry.clone(),
        ServerOptions {
            port,
            ipv4_only: true,
            statsd_port: Some(statsd_port),
            socket_path: None,
        },
    ));
    server.start().unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender
        .send_to(
            b"c:page.views:1\nt:req.latency:0.35\n",
            ("127.0.0.1", port),
        )
        .unwrap();
    sender
        .send_to(b"song.length:240|h|#region:east\n", ("127.0.0.1", statsd_port))
        .unwrap();

    // uptime age gauge registered at startup
    assert_eq!(registry.age_gauges().len(), 1);

    let views = wait_for(|| {
        registry
            .counters()
            .iter()
            .find(|c| {
                use spectatord::meters::Meter;
                c.meter_id().name() == intern("page.views")
            })
            .filter(|c| c.count() > 0.0)
            .map(|c| c.count())
    });
    assert!((views - 1.0).abs() < 1e-9);

    let latency_count = wait_for(|| {
        registry
            .timers()
            .iter()
            .find(|t| {
                use spectatord::meters::Meter;
                t.meter_id().name() == intern("req.latency")
            })
            .filter(|t| t.count() > 0)
            .map(|t| t.count())
    });
    assert_eq!(latency_count, 1);

    let song_total = wait_for(|| {
        registry
            .dist_summaries()
            .iter()
            .find(|d| {
                use spectatord::meters::Meter;
                d.meter_id().name() == intern("song.length")
            })
            .filter(|d| d.count() > 0)
            .map(|d| d.total_amount())
    });
    assert!((song_total - 240.0).abs() < 1e-9);

    server.stop();
}
