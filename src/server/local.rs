//! UNIX datagram server.

#![cfg(unix)]

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::DaemonResult;

const RECV_BUFFER_SIZE: usize = 65536;

/// Unlink any stale socket and make sure the parent directory exists with
/// permissions that let any local user send metrics.
pub(crate) fn prepare_socket_path(path: &Path) {
    let _ = std::fs::remove_file(path);
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            debug!("creating dir: {}", dir.display());
            if let Err(err) = std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o777)
                .create(dir)
            {
                warn!("unable to create {}: {err}", dir.display());
            }
        }
    }
}

/// Bind the datagram socket and open it up to all local senders.
pub(crate) fn bind_socket(path: &Path) -> DaemonResult<UnixDatagram> {
    prepare_socket_path(path);
    let socket = UnixDatagram::bind(path)?;
    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)) {
        warn!("unable to set permissions on {}: {err}", path.display());
    }
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    Ok(socket)
}

/// Receive loop mirroring the UDP server's contract.
pub(crate) fn spawn_receive_loop(
    socket: UnixDatagram,
    shutdown: Arc<AtomicBool>,
    handler: impl Fn(&str) + Send + 'static,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
        while !shutdown.load(Ordering::Relaxed) {
            match socket.recv(&mut buffer) {
                Ok(received) => {
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
