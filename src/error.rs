use thiserror::Error;

/// Errors that can occur while running the daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// A custom error with a free-form message.
    #[error("Custom error: {0}")]
    Custom(String),

    /// An I/O error from the standard library.
    #[error("Std Io error: {0}")]
    StdIo(#[from] std::io::Error),

    /// Failed to build or drive the HTTP client.
    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configuration could not be assembled from the given inputs.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The publish payload could not be compressed.
    #[error("Payload compression error: {0}")]
    Compression(String),
}

impl From<String> for DaemonError {
    fn from(value: String) -> Self {
        Self::Custom(value)
    }
}

impl From<&str> for DaemonError {
    fn from(value: &str) -> Self {
        Self::Custom(value.to_string())
    }
}
