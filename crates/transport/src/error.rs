//! Error types for transport operations

/// Failures that left the caller without an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("client construction failed: {0}")]
    Client(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
