//! # rde-protocol
//!
//! PLDM wire protocol for Redfish Device Enablement (DSP0218), as seen from the
//! management controller.
//!
//! This crate provides:
//! - PLDM message header encoding and response validation
//! - Request encoders and response decoders for the RDE commands
//! - Multipart transfer flags, operations, and the integrity checksum
//! - Redfish Resource PDR record decoding and encoding
//! - Completion codes and protocol constants

pub mod codec;
pub mod error;
pub mod header;
pub mod message;
pub mod pdr;

pub use codec::{
    transfer_checksum, GetSchemaDictionaryRequest, GetSchemaDictionaryResponse,
    MultipartReceiveRequest, MultipartReceiveResponse, MultipartSendRequest,
    MultipartSendResponse, NegotiateMediumParametersRequest, NegotiateMediumParametersResponse,
    NegotiateRedfishParametersRequest, NegotiateRedfishParametersResponse,
    OperationCompleteRequest, OperationCompleteResponse, OperationInitRequest,
    OperationInitResponse, RdeRequest, RdeResponse, CHECKSUM_SIZE, MULTIPART_SEND_FIXED_SIZE,
    OPERATION_INIT_FIXED_SIZE,
};
pub use error::{CompletionCode, ProtocolError};
pub use header::{
    encode_request, split_response, MessageKind, PldmHeader, MAX_INSTANCE_ID, PLDM_HEADER_SIZE,
};
pub use message::{
    schema_class, DeviceCapabilities, FeatureSupport, OperationFlags, OperationStatus,
    OperationType, RdeCommand, Reader, TransferFlag, TransferOperation, VarString,
};
pub use pdr::{AdditionalResource, RedfishResourcePdr, SchemaVersion};

/// PLDM type number for Redfish Device Enablement.
pub const PLDM_TYPE_RDE: u8 = 0x06;

/// Smallest transfer chunk size a DSP0218 endpoint may negotiate.
pub const MIN_TRANSFER_CHUNK_SIZE: u32 = 64;

/// Upper bound on a single received message (64 KiB).
pub const MAX_RECEIVE_BUFFER: usize = 64 * 1024;
