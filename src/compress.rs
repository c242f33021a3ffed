//! Streaming gzip buffer for publish payloads.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::DaemonError;
use crate::DaemonResult;

const INITIAL_CAPACITY: usize = 256 * 1024;

/// Accumulates payload bytes through a best-speed gzip stream. Write errors
/// are captured and surfaced when the result is taken, so the byte-emitting
/// call sites stay infallible.
pub(crate) struct CompressedBuffer {
    encoder: GzEncoder<Vec<u8>>,
    error: Option<std::io::Error>,
}

impl CompressedBuffer {
    pub fn new() -> Self {
        Self {
            encoder: GzEncoder::new(Vec::with_capacity(INITIAL_CAPACITY), Compression::fast()),
            error: None,
        }
    }

    pub fn put(&mut self, bytes: &[u8]) {
        if self.error.is_none() {
            if let Err(err) = self.encoder.write_all(bytes) {
                self.error = Some(err);
            }
        }
    }

    /// Finish the stream and return the gzipped payload.
    pub fn finish(self) -> DaemonResult<Vec<u8>> {
        if let Some(err) = self.error {
            return Err(DaemonError::Compression(err.to_string()));
        }
        self.encoder
            .finish()
            .map_err(|err| DaemonError::Compression(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::CompressedBuffer;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn round_trips_through_gzip() {
        let mut buffer = CompressedBuffer::new();
        buffer.put(b"hello ");
        buffer.put(b"world");
        let compressed = buffer.finish().unwrap();
        // gzip magic
        assert_eq!(&compressed[..2], &[0x1F, 0x8B]);

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"hello world");
    }
}
