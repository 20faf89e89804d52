use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("reference has no usable basename: {0}")]
    NoBasename(String),

    #[error("scheme not allowed: {0}")]
    SchemeNotAllowed(String),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::Status {
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            };
        }
        FetchError::Network(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("transform task aborted: {0}")]
    Aborted(String),

    #[error("spool I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP {status} writing {key}")]
    Status { key: String, status: u16 },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Network(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("status sink unavailable: {0}")]
    Unavailable(String),

    #[error("status sink write failed: {0}")]
    Io(#[from] std::io::Error),

    /// Part of the frame already reached the peer.
    #[error("status sink write failed after {written} of {len} bytes: {source}")]
    PartialWrite {
        written: usize,
        len: usize,
        source: std::io::Error,
    },
}

impl SinkError {
    /// Resending after a partial write would duplicate the line downstream.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SinkError::PartialWrite { .. })
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("reading manifest {source_name}: {message}")]
    Read { source_name: String, message: String },

    #[error("HTTP {status} fetching manifest {url}")]
    Status { url: String, status: u16 },

    #[error("invalid skip_pattern: {0}")]
    Pattern(#[from] regex::Error),
}
