//! Error types for the warehouse module.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors returned by warehouses.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// Table or view name is not a plain identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Staged object format cannot be loaded by this warehouse.
    #[error("Unsupported format '{format}' for object {key}")]
    UnsupportedFormat { key: String, format: String },

    /// Staged object content is malformed.
    #[error("Invalid data in {key}: {reason}")]
    InvalidData { key: String, reason: String },

    /// Reading a staged object failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Query or statement failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Background task running the statement failed.
    #[error("Warehouse task failed: {0}")]
    TaskFailed(String),
}

impl From<rusqlite::Error> for WarehouseError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}
