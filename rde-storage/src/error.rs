//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the dictionary store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dictionary ({resource_id}, {schema_class}) is already complete")]
    DictionaryComplete { resource_id: u32, schema_class: u8 },

    #[error("dictionary ({resource_id}, {schema_class}) not found")]
    DictionaryNotFound { resource_id: u32, schema_class: u8 },

    #[error("data corruption in {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },
}

impl StorageError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Io(_))
    }
}
