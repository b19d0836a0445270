//! Core error types.

use thiserror::Error;

/// Errors from the device model.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("failed to decode resource PDR #{index}: {source}")]
    PdrDecode {
        index: usize,
        #[source]
        source: rde_protocol::ProtocolError,
    },

    #[error("required metadata field not set: {0}")]
    MissingMetadata(crate::metadata::MetadataKey),

    #[error("invalid JSON payload: {0}")]
    InvalidPayload(String),

    #[error("BEJ encode failed: {0}")]
    Encode(String),

    #[error("BEJ decode failed: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether the condition describes an unknown resource rather
    /// than a failure of the device model.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::ResourceNotFound(_))
    }

    /// Returns an error code suitable for caller-facing results.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            CoreError::PdrDecode { .. } => "BAD_PDR",
            CoreError::MissingMetadata(_) => "PRECONDITION_FAILED",
            CoreError::InvalidPayload(_) => "BAD_REQUEST",
            CoreError::Encode(_) => "ENCODE_FAILED",
            CoreError::Decode(_) => "DECODE_FAILED",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}
