//! UDP datagram server.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::error;

const RECV_BUFFER_SIZE: usize = 65536;

/// Run a receive loop on its own thread. Each datagram is handed to the
/// handler exactly once; receive errors are logged and the loop continues.
/// The socket must carry a read timeout so the loop can observe shutdown.
pub(crate) fn spawn_receive_loop(
    socket: UdpSocket,
    shutdown: Arc<AtomicBool>,
    handler: impl Fn(&str) + Send + 'static,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        while !shutdown.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buffer) {
                Ok((received, _)) => {
                    if received > 0 {
                        let text = String::from_utf8_lossy(&buffer[..received]);
                        handler(&text);
                    }
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => {
                    error!("Error receiving: {err}");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::spawn_receive_loop;
    use std::net::UdpSocket;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn datagrams_reach_the_handler_once() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();

        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_receive_loop(socket, shutdown.clone(), move |text| {
            sink.lock().unwrap().push(text.to_string());
        });

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"c:page.views:1\n", addr).unwrap();
        sender.send_to(b"c:page.views:2\n", addr).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while received.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], "c:page.views:1\n");
    }
}
