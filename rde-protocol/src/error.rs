//! Protocol error types and PLDM/RDE completion codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding PLDM RDE messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated message: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("expected a response message, got a request")]
    NotAResponse,

    #[error("unexpected PLDM type: {0:#04x}")]
    UnexpectedPldmType(u8),

    #[error("unexpected command: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedCommand { expected: u8, actual: u8 },

    #[error("instance id mismatch: expected {expected}, got {actual}")]
    InstanceMismatch { expected: u8, actual: u8 },

    #[error("instance id out of range: {0}")]
    InvalidInstanceId(u8),

    #[error("unknown RDE command: {0:#04x}")]
    UnknownCommand(u8),

    #[error("invalid transfer flag: {0}")]
    InvalidTransferFlag(u8),

    #[error("invalid transfer operation: {0}")]
    InvalidTransferOperation(u8),

    #[error("invalid operation type: {0}")]
    InvalidOperationType(u8),

    #[error("invalid length for {field}: {value}")]
    InvalidLength { field: &'static str, value: usize },

    #[error("last multipart chunk requires an integrity checksum")]
    MissingChecksum,

    #[error("integrity checksum is only allowed on the last multipart chunk")]
    UnexpectedChecksum,

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("embedded NUL in {0}")]
    EmbeddedNul(&'static str),

    #[error("device returned completion code {0}")]
    Completion(CompletionCode),
}

impl ProtocolError {
    /// Returns the device completion code if this error carries one.
    pub fn completion_code(&self) -> Option<CompletionCode> {
        match self {
            ProtocolError::Completion(cc) => Some(*cc),
            _ => None,
        }
    }
}

/// PLDM base and RDE (DSP0218) completion codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionCode {
    Success,
    Error,
    ErrorInvalidData,
    ErrorInvalidLength,
    ErrorNotReady,
    ErrorUnsupportedPldmCmd,
    ErrorInvalidPldmType,

    BadChecksum,
    CannotCreateOperation,
    NotAllowed,
    WrongLocationType,
    OperationAbandoned,
    OperationUnkillable,
    OperationExists,
    OperationFailed,
    Unexpected,
    Unsupported,
    UnrecognizedCustomHeader,
    EtagMatch,
    NoSuchResource,
    EtagCalculationOngoing,

    Unknown(u8),
}

impl CompletionCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => CompletionCode::Success,
            0x01 => CompletionCode::Error,
            0x02 => CompletionCode::ErrorInvalidData,
            0x03 => CompletionCode::ErrorInvalidLength,
            0x04 => CompletionCode::ErrorNotReady,
            0x05 => CompletionCode::ErrorUnsupportedPldmCmd,
            0x20 => CompletionCode::ErrorInvalidPldmType,
            0x80 => CompletionCode::BadChecksum,
            0x81 => CompletionCode::CannotCreateOperation,
            0x82 => CompletionCode::NotAllowed,
            0x83 => CompletionCode::WrongLocationType,
            0x84 => CompletionCode::OperationAbandoned,
            0x85 => CompletionCode::OperationUnkillable,
            0x86 => CompletionCode::OperationExists,
            0x87 => CompletionCode::OperationFailed,
            0x88 => CompletionCode::Unexpected,
            0x89 => CompletionCode::Unsupported,
            0x90 => CompletionCode::UnrecognizedCustomHeader,
            0x91 => CompletionCode::EtagMatch,
            0x92 => CompletionCode::NoSuchResource,
            0x93 => CompletionCode::EtagCalculationOngoing,
            other => CompletionCode::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CompletionCode::Success => 0x00,
            CompletionCode::Error => 0x01,
            CompletionCode::ErrorInvalidData => 0x02,
            CompletionCode::ErrorInvalidLength => 0x03,
            CompletionCode::ErrorNotReady => 0x04,
            CompletionCode::ErrorUnsupportedPldmCmd => 0x05,
            CompletionCode::ErrorInvalidPldmType => 0x20,
            CompletionCode::BadChecksum => 0x80,
            CompletionCode::CannotCreateOperation => 0x81,
            CompletionCode::NotAllowed => 0x82,
            CompletionCode::WrongLocationType => 0x83,
            CompletionCode::OperationAbandoned => 0x84,
            CompletionCode::OperationUnkillable => 0x85,
            CompletionCode::OperationExists => 0x86,
            CompletionCode::OperationFailed => 0x87,
            CompletionCode::Unexpected => 0x88,
            CompletionCode::Unsupported => 0x89,
            CompletionCode::UnrecognizedCustomHeader => 0x90,
            CompletionCode::EtagMatch => 0x91,
            CompletionCode::NoSuchResource => 0x92,
            CompletionCode::EtagCalculationOngoing => 0x93,
            CompletionCode::Unknown(value) => *value,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CompletionCode::Success)
    }

    /// Returns whether the device may accept the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionCode::ErrorNotReady | CompletionCode::EtagCalculationOngoing
        )
    }

    /// Human-readable explanation used in failure logs.
    pub fn description(&self) -> &'static str {
        match self {
            CompletionCode::Success => "success",
            CompletionCode::Error => "generic failure",
            CompletionCode::ErrorInvalidData => "request data was invalid",
            CompletionCode::ErrorInvalidLength => "request length was invalid",
            CompletionCode::ErrorNotReady => "device is not ready",
            CompletionCode::ErrorUnsupportedPldmCmd => "command is not supported",
            CompletionCode::ErrorInvalidPldmType => "PLDM type is not supported",
            CompletionCode::BadChecksum => "the payload checksum is incorrect",
            CompletionCode::CannotCreateOperation => "unable to create operation",
            CompletionCode::NotAllowed => "operation not permitted",
            CompletionCode::WrongLocationType => "invalid location type specified",
            CompletionCode::OperationAbandoned => "operation was aborted unexpectedly",
            CompletionCode::OperationUnkillable => "cannot forcibly cancel operation",
            CompletionCode::OperationExists => "duplicate operation detected",
            CompletionCode::OperationFailed => "operation execution failed",
            CompletionCode::Unexpected => "internal or unknown error occurred",
            CompletionCode::Unsupported => "command or resource not supported",
            CompletionCode::UnrecognizedCustomHeader => "header format not recognized",
            CompletionCode::EtagMatch => "ETag comparison mismatch",
            CompletionCode::NoSuchResource => "referenced resource was not found",
            CompletionCode::EtagCalculationOngoing => "ETag generation in progress",
            CompletionCode::Unknown(_) => "unknown completion code",
        }
    }
}

impl fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionCode::Success => "SUCCESS",
            CompletionCode::Error => "ERROR",
            CompletionCode::ErrorInvalidData => "ERROR_INVALID_DATA",
            CompletionCode::ErrorInvalidLength => "ERROR_INVALID_LENGTH",
            CompletionCode::ErrorNotReady => "ERROR_NOT_READY",
            CompletionCode::ErrorUnsupportedPldmCmd => "ERROR_UNSUPPORTED_PLDM_CMD",
            CompletionCode::ErrorInvalidPldmType => "ERROR_INVALID_PLDM_TYPE",
            CompletionCode::BadChecksum => "BAD_CHECKSUM",
            CompletionCode::CannotCreateOperation => "CANNOT_CREATE_OPERATION",
            CompletionCode::NotAllowed => "NOT_ALLOWED",
            CompletionCode::WrongLocationType => "WRONG_LOCATION_TYPE",
            CompletionCode::OperationAbandoned => "OPERATION_ABANDONED",
            CompletionCode::OperationUnkillable => "OPERATION_UNKILLABLE",
            CompletionCode::OperationExists => "OPERATION_EXISTS",
            CompletionCode::OperationFailed => "OPERATION_FAILED",
            CompletionCode::Unexpected => "UNEXPECTED",
            CompletionCode::Unsupported => "UNSUPPORTED",
            CompletionCode::UnrecognizedCustomHeader => "UNRECOGNIZED_CUSTOM_HEADER",
            CompletionCode::EtagMatch => "ETAG_MATCH",
            CompletionCode::NoSuchResource => "NO_SUCH_RESOURCE",
            CompletionCode::EtagCalculationOngoing => "ETAG_CALCULATION_ONGOING",
            CompletionCode::Unknown(value) => return write!(f, "UNKNOWN({:#04x})", value),
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_code_values() {
        for value in 0..=u8::MAX {
            assert_eq!(CompletionCode::from_u8(value).as_u8(), value);
        }
        assert_eq!(CompletionCode::from_u8(0x80), CompletionCode::BadChecksum);
        assert_eq!(CompletionCode::from_u8(0x92), CompletionCode::NoSuchResource);
        assert_eq!(CompletionCode::from_u8(0x42), CompletionCode::Unknown(0x42));
    }

    #[test]
    fn test_completion_code_retryable() {
        assert!(CompletionCode::ErrorNotReady.is_retryable());
        assert!(CompletionCode::EtagCalculationOngoing.is_retryable());

        assert!(!CompletionCode::Success.is_retryable());
        assert!(!CompletionCode::OperationFailed.is_retryable());
        assert!(!CompletionCode::NoSuchResource.is_retryable());
    }

    #[test]
    fn test_completion_code_display() {
        assert_eq!(format!("{}", CompletionCode::Success), "SUCCESS");
        assert_eq!(format!("{}", CompletionCode::BadChecksum), "BAD_CHECKSUM");
        assert_eq!(
            format!("{}", CompletionCode::EtagCalculationOngoing),
            "ETAG_CALCULATION_ONGOING"
        );
        assert_eq!(format!("{}", CompletionCode::Unknown(0x42)), "UNKNOWN(0x42)");
    }

    #[test]
    fn test_completion_code_serialization() {
        let json = serde_json::to_string(&CompletionCode::NotAllowed).unwrap();
        assert_eq!(json, "\"NOT_ALLOWED\"");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::Truncated {
            needed: 4,
            remaining: 1,
        };
        assert!(err.to_string().contains("need 4"));

        let err = ProtocolError::UnexpectedCommand {
            expected: 0x10,
            actual: 0x13,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x10") && msg.contains("0x13"));

        let err = ProtocolError::Completion(CompletionCode::OperationFailed);
        assert!(err.to_string().contains("OPERATION_FAILED"));
        assert_eq!(
            err.completion_code(),
            Some(CompletionCode::OperationFailed)
        );
        assert!(ProtocolError::NotAResponse.completion_code().is_none());
    }
}
