//! Kernel network counters, read from `/proc` on a best-effort basis.

use std::path::Path;
use std::sync::OnceLock;

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// UDP socket statistics for one local port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UdpInfo {
    pub rx_queue_bytes: u64,
    pub num_dropped: u64,
}

pub(crate) fn read_buffer_limit(path: &Path) -> Option<usize> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// The kernel's maximum receive buffer size, read once and cached.
pub(crate) fn max_buffer_size() -> usize {
    static CACHED: OnceLock<usize> = OnceLock::new();
    *CACHED.get_or_init(|| {
        read_buffer_limit(Path::new("/proc/sys/net/core/rmem_max")).unwrap_or(DEFAULT_BUFFER_SIZE)
    })
}

/// Parse `/proc/net/udp`-formatted socket tables for the given port.
pub(crate) fn parse_udp_info(port: u16, path: &Path) -> Option<UdpInfo> {
    let contents = std::fs::read_to_string(path).ok()?;
    let mut lines = contents.lines();
    // header
    lines.next()?;

    for line in lines {
        let fields: Vec<&str> = line
            .split(|c| c == ' ' || c == ':')
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() < 17 {
            continue;
        }
        let Ok(current_port) = u32::from_str_radix(fields[2], 16) else {
            continue;
        };
        if current_port != u32::from(port) {
            continue;
        }
        let rx_queue_bytes = u64::from_str_radix(fields[7], 16).unwrap_or(0);
        let num_dropped = fields[16].parse().unwrap_or(0);
        return Some(UdpInfo {
            rx_queue_bytes,
            num_dropped,
        });
    }
    None
}

/// Drop and queue statistics for a local UDP port.
pub(crate) fn udp_info(port: u16) -> Option<UdpInfo> {
    parse_udp_info(port, Path::new("/proc/net/udp"))
}

#[cfg(test)]
mod tests {
    use super::{parse_udp_info, read_buffer_limit, UdpInfo};
    use std::io::Write;

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_buffer_limit() {
        let path = temp_file("spectatord-rmem", "212992\n");
        assert_eq!(read_buffer_limit(&path), Some(212_992));
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read_buffer_limit(std::path::Path::new("/nonexistent")), None);
    }

    #[test]
    fn parses_udp_table() {
        // port 1234 = 0x04D2, rx_queue 0x1C8, drops 42
        let table = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
 2410: 00000000:04D2 00000000:0000 07 00000000:000001C8 00:00000000 00000000   999        0 21588 2 0000000000000000 42
 2411: 00000000:14E9 00000000:0000 07 00000000:00000000 00:00000000 00000000   999        0 21589 2 0000000000000000 0
";
        let path = temp_file("spectatord-udp", table);
        assert_eq!(
            parse_udp_info(1234, &path),
            Some(UdpInfo {
                rx_queue_bytes: 0x1C8,
                num_dropped: 42
            })
        );
        assert_eq!(parse_udp_info(4321, &path), None);
        std::fs::remove_file(&path).unwrap();
    }
}
