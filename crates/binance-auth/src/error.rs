//! Error types for authentication and credential persistence

/// Errors from credential encryption and storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("base64 decode failed: {0}")]
    Decode(String),

    #[error("invalid key: {0}")]
    Key(String),

    #[error("preference store error: {0}")]
    Preferences(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
