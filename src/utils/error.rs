//! Error types for the Binix network core

use thiserror::Error;

/// Main error type for network core operations
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O errors (persisted stores, cache files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Request URI could not be parsed or has no host
    #[error("invalid URI: {0}")]
    InvalidUri(String),
    /// No connection implementation is registered for the scheme
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    /// A connection failed to open, process or close
    #[error("connection error: {0}")]
    Connection(String),
    /// Persisted protocol-support store is unusable
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Response cache lookup or load failed
    #[error("cache error: {0}")]
    Cache(String),
    /// Malformed binary or textual data
    #[error("format error: {0}")]
    Format(String),
}

impl From<url::ParseError> for NetError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUri(err.to_string())
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(err.to_string())
    }
}

/// Convenience Result type for network core operations
pub type Result<T> = std::result::Result<T, NetError>;
