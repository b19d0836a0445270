//! Engine error types.

use crate::state::{DeviceState, OpState};
use rde_protocol::{CompletionCode, OperationStatus, OperationType};
use std::fmt;
use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("protocol error: {0}")]
    Protocol(#[from] rde_protocol::ProtocolError),

    #[error("storage error: {0}")]
    Storage(#[from] rde_storage::StorageError),

    #[error("core error: {0}")]
    Core(#[from] rde_core::CoreError),

    #[error("no free instance id for EID {0}")]
    InstanceIdExhausted(u8),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no response from EID {0}")]
    NoResponse(u8),

    #[error("unknown endpoint {0}")]
    DeviceNotFound(u8),

    #[error("device at EID {eid} is {state}")]
    DeviceNotReady { eid: u8, state: DeviceState },

    #[error("operation {0} not supported by device")]
    UnsupportedOperation(OperationType),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("schema dictionary ({resource_id}, {schema_class}) not available")]
    DictionaryMissing { resource_id: u32, schema_class: u8 },

    #[error("annotation dictionary not available")]
    AnnotationDictionaryMissing,

    #[error("device reported operation status {0:?}")]
    OperationStatus(OperationStatus),

    #[error("multipart transfer failed: {0}")]
    Transfer(String),

    #[error("session ended in state {0}")]
    SessionAborted(OpState),

    #[error("operation timed out")]
    TimedOut,

    #[error("manager shutting down")]
    ShuttingDown,
}

/// Stable error kinds reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadResponse,
    DeviceError,
    DeviceNotReady,
    ResourceNotFound,
    PreconditionFailed,
    BadRequest,
    Unsupported,
    ResourceExhausted,
    Timeout,
    Aborted,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadResponse => "BAD_RESPONSE",
            ErrorKind::DeviceError => "DEVICE_ERROR",
            ErrorKind::DeviceNotReady => "DEVICE_NOT_READY",
            ErrorKind::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorKind::PreconditionFailed => "PRECONDITION_FAILED",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::Unsupported => "UNSUPPORTED",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Aborted => "ABORTED",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    /// Converts to a caller-facing error kind.
    pub fn error_code(&self) -> ErrorKind {
        match self {
            EngineError::Protocol(e) => match e.completion_code() {
                Some(_) => ErrorKind::DeviceError,
                None => ErrorKind::BadResponse,
            },
            EngineError::Storage(_) => ErrorKind::InternalError,
            EngineError::Core(e) => match e.error_code() {
                "RESOURCE_NOT_FOUND" => ErrorKind::ResourceNotFound,
                "PRECONDITION_FAILED" => ErrorKind::PreconditionFailed,
                "BAD_REQUEST" => ErrorKind::BadRequest,
                "BAD_PDR" => ErrorKind::BadResponse,
                _ => ErrorKind::InternalError,
            },
            EngineError::InstanceIdExhausted(_) => ErrorKind::ResourceExhausted,
            EngineError::Transport(_) => ErrorKind::InternalError,
            EngineError::NoResponse(_) => ErrorKind::Timeout,
            EngineError::DeviceNotFound(_) => ErrorKind::ResourceNotFound,
            EngineError::DeviceNotReady { .. } => ErrorKind::DeviceNotReady,
            EngineError::UnsupportedOperation(_) => ErrorKind::Unsupported,
            EngineError::InvalidRequest(_) => ErrorKind::BadRequest,
            EngineError::DictionaryMissing { .. } => ErrorKind::PreconditionFailed,
            EngineError::AnnotationDictionaryMissing => ErrorKind::PreconditionFailed,
            EngineError::OperationStatus(_) => ErrorKind::DeviceError,
            EngineError::Transfer(_) => ErrorKind::BadResponse,
            EngineError::SessionAborted(_) => ErrorKind::Aborted,
            EngineError::TimedOut => ErrorKind::Timeout,
            EngineError::ShuttingDown => ErrorKind::Aborted,
        }
    }

    /// Returns the completion code reported by the device, if any.
    pub fn completion_code(&self) -> Option<CompletionCode> {
        match self {
            EngineError::Protocol(e) => e.completion_code(),
            _ => None,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        if let Some(cc) = self.completion_code() {
            return cc.is_retryable();
        }
        matches!(
            self.error_code(),
            ErrorKind::DeviceNotReady | ErrorKind::ResourceExhausted | ErrorKind::Timeout
        ) || matches!(self, EngineError::DictionaryMissing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rde_protocol::ProtocolError;

    #[test]
    fn test_error_codes() {
        let not_found: EngineError =
            rde_core::CoreError::ResourceNotFound("/redfish/v1/X".to_string()).into();
        assert_eq!(not_found.error_code(), ErrorKind::ResourceNotFound);

        let device: EngineError = ProtocolError::Completion(CompletionCode::ErrorNotReady).into();
        assert_eq!(device.error_code(), ErrorKind::DeviceError);
        assert!(device.is_retryable());

        let truncated: EngineError = ProtocolError::Truncated {
            needed: 4,
            remaining: 1,
        }
        .into();
        assert_eq!(truncated.error_code().as_str(), "BAD_RESPONSE");
        assert!(!truncated.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(EngineError::InstanceIdExhausted(8).is_retryable());
        assert!(EngineError::TimedOut.is_retryable());
        assert!(EngineError::DictionaryMissing {
            resource_id: 1,
            schema_class: 0
        }
        .is_retryable());
        assert!(!EngineError::UnsupportedOperation(OperationType::Delete).is_retryable());
        assert!(!EngineError::SessionAborted(OpState::Cancelled).is_retryable());
    }
}
