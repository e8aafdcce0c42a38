//! Error types for the storage module.

use thiserror::Error;

/// Errors returned by object stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object does not exist.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Key is empty, absolute or escapes the bucket.
    #[error("Invalid object key: {key}")]
    InvalidKey { key: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}
