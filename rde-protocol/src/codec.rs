//! Request encoders and response decoders for the RDE commands used by the
//! management controller.
//!
//! Request bodies are encoded without the PLDM header (see
//! [`crate::header::encode_request`]). Response bodies are decoded starting at
//! the completion code; any non-success code is returned as
//! [`ProtocolError::Completion`] before the rest of the body is inspected.

use crate::error::{CompletionCode, ProtocolError};
use crate::message::{
    DeviceCapabilities, FeatureSupport, OperationFlags, OperationStatus, OperationType,
    RdeCommand, Reader, TransferFlag, TransferOperation, VarString,
};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the integrity checksum trailing the last multipart chunk.
pub const CHECKSUM_SIZE: usize = 4;

/// Fixed portion of an RDEOperationInit request body.
pub const OPERATION_INIT_FIXED_SIZE: usize = 17;

/// Fixed portion of an RDEMultipartSend request body (without checksum).
pub const MULTIPART_SEND_FIXED_SIZE: usize = 15;

/// Computes the multipart integrity checksum (CRC-32) over a whole payload.
pub fn transfer_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A request body that can be encoded for a specific command.
pub trait RdeRequest {
    const COMMAND: RdeCommand;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError>;

    /// Encodes the body into a fresh buffer.
    fn to_body(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode_body(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// A response body that can be decoded for a specific command.
pub trait RdeResponse: Sized {
    const COMMAND: RdeCommand;

    /// Decodes the fields following a successful completion code.
    fn decode_fields(reader: &mut Reader<'_>) -> Result<Self, ProtocolError>;

    /// Decodes a response body starting at the completion code.
    fn decode_body(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(body);
        let cc = CompletionCode::from_u8(reader.u8()?);
        if !cc.is_success() {
            return Err(ProtocolError::Completion(cc));
        }
        Self::decode_fields(&mut reader)
    }
}

// ---------------------------------------------------------------------------
// NegotiateRedfishParameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateRedfishParametersRequest {
    pub mc_concurrency_support: u8,
    pub mc_feature_support: FeatureSupport,
}

impl RdeRequest for NegotiateRedfishParametersRequest {
    const COMMAND: RdeCommand = RdeCommand::NegotiateRedfishParameters;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(self.mc_concurrency_support);
        buf.put_u16_le(self.mc_feature_support.bits());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateRedfishParametersResponse {
    pub device_concurrency_support: u8,
    pub device_capabilities: DeviceCapabilities,
    pub device_feature_support: FeatureSupport,
    pub device_configuration_signature: u32,
    pub device_provider_name: VarString,
}

impl NegotiateRedfishParametersResponse {
    /// Encodes a successful response body; used by device simulators and tests.
    pub fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(CompletionCode::Success.as_u8());
        buf.put_u8(self.device_concurrency_support);
        buf.put_u8(self.device_capabilities.bits());
        buf.put_u16_le(self.device_feature_support.bits());
        buf.put_u32_le(self.device_configuration_signature);
        self.device_provider_name.encode(buf)
    }
}

impl RdeResponse for NegotiateRedfishParametersResponse {
    const COMMAND: RdeCommand = RdeCommand::NegotiateRedfishParameters;

    fn decode_fields(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            device_concurrency_support: reader.u8()?,
            device_capabilities: DeviceCapabilities::from_bits(reader.u8()?),
            device_feature_support: FeatureSupport::from_bits(reader.u16()?),
            device_configuration_signature: reader.u32()?,
            device_provider_name: VarString::decode(reader)?,
        })
    }
}

// ---------------------------------------------------------------------------
// NegotiateMediumParameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiateMediumParametersRequest {
    pub mc_max_transfer_chunk_size: u32,
}

impl RdeRequest for NegotiateMediumParametersRequest {
    const COMMAND: RdeCommand = RdeCommand::NegotiateMediumParameters;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32_le(self.mc_max_transfer_chunk_size);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiateMediumParametersResponse {
    pub device_max_transfer_chunk_size: u32,
}

impl RdeResponse for NegotiateMediumParametersResponse {
    const COMMAND: RdeCommand = RdeCommand::NegotiateMediumParameters;

    fn decode_fields(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            device_max_transfer_chunk_size: reader.u32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// GetSchemaDictionary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetSchemaDictionaryRequest {
    pub resource_id: u32,
    pub schema_class: u8,
}

impl RdeRequest for GetSchemaDictionaryRequest {
    const COMMAND: RdeCommand = RdeCommand::GetSchemaDictionary;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32_le(self.resource_id);
        buf.put_u8(self.schema_class);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetSchemaDictionaryResponse {
    pub dictionary_format: u8,
    pub transfer_handle: u32,
}

impl RdeResponse for GetSchemaDictionaryResponse {
    const COMMAND: RdeCommand = RdeCommand::GetSchemaDictionary;

    fn decode_fields(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            dictionary_format: reader.u8()?,
            transfer_handle: reader.u32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// RDEOperationInit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInitRequest {
    pub resource_id: u32,
    pub operation_id: u16,
    pub operation_type: OperationType,
    pub operation_flags: OperationFlags,
    pub send_data_transfer_handle: u32,
    pub operation_locator: Bytes,
    pub request_payload: Bytes,
}

impl RdeRequest for OperationInitRequest {
    const COMMAND: RdeCommand = RdeCommand::OperationInit;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.operation_locator.len() > u8::MAX as usize {
            return Err(ProtocolError::InvalidLength {
                field: "operation_locator",
                value: self.operation_locator.len(),
            });
        }
        if self.request_payload.len() > u32::MAX as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.request_payload.len(),
                max: u32::MAX as usize,
            });
        }

        buf.reserve(
            OPERATION_INIT_FIXED_SIZE + self.operation_locator.len() + self.request_payload.len(),
        );
        buf.put_u32_le(self.resource_id);
        buf.put_u16_le(self.operation_id);
        buf.put_u8(self.operation_type.as_u8());
        buf.put_u8(self.operation_flags.bits());
        buf.put_u32_le(self.send_data_transfer_handle);
        buf.put_u8(self.operation_locator.len() as u8);
        buf.put_u32_le(self.request_payload.len() as u32);
        buf.put_slice(&self.operation_locator);
        buf.put_slice(&self.request_payload);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInitResponse {
    pub operation_status: OperationStatus,
    pub completion_percentage: u8,
    pub completion_time_seconds: u32,
    pub operation_execution_flags: u8,
    pub result_transfer_handle: u32,
    pub permission_flags: u8,
    pub etag: VarString,
    pub response_payload: Bytes,
}

impl OperationInitResponse {
    /// Encodes a successful response body; used by device simulators and tests.
    pub fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u8(CompletionCode::Success.as_u8());
        buf.put_u8(self.operation_status.as_u8());
        buf.put_u8(self.completion_percentage);
        buf.put_u32_le(self.completion_time_seconds);
        buf.put_u8(self.operation_execution_flags);
        buf.put_u32_le(self.result_transfer_handle);
        buf.put_u8(self.permission_flags);
        buf.put_u32_le(self.response_payload.len() as u32);
        self.etag.encode(buf)?;
        buf.put_slice(&self.response_payload);
        Ok(())
    }
}

impl RdeResponse for OperationInitResponse {
    const COMMAND: RdeCommand = RdeCommand::OperationInit;

    fn decode_fields(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let operation_status = OperationStatus::from_u8(reader.u8()?);
        let completion_percentage = reader.u8()?;
        let completion_time_seconds = reader.u32()?;
        let operation_execution_flags = reader.u8()?;
        let result_transfer_handle = reader.u32()?;
        let permission_flags = reader.u8()?;
        let payload_len = reader.u32()? as usize;
        let etag = VarString::decode(reader)?;
        let response_payload = reader.take_bytes(payload_len)?;

        Ok(Self {
            operation_status,
            completion_percentage,
            completion_time_seconds,
            operation_execution_flags,
            result_transfer_handle,
            permission_flags,
            etag,
            response_payload,
        })
    }
}

// ---------------------------------------------------------------------------
// RDEOperationComplete
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationCompleteRequest {
    pub resource_id: u32,
    pub operation_id: u16,
}

impl RdeRequest for OperationCompleteRequest {
    const COMMAND: RdeCommand = RdeCommand::OperationComplete;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32_le(self.resource_id);
        buf.put_u16_le(self.operation_id);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationCompleteResponse;

impl RdeResponse for OperationCompleteResponse {
    const COMMAND: RdeCommand = RdeCommand::OperationComplete;

    fn decode_fields(_reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

// ---------------------------------------------------------------------------
// RDEMultipartSend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSendRequest {
    pub data_transfer_handle: u32,
    pub operation_id: u16,
    pub transfer_flag: TransferFlag,
    pub next_data_transfer_handle: u32,
    pub data: Bytes,
    /// Present only on the last chunk.
    pub checksum: Option<u32>,
}

impl RdeRequest for MultipartSendRequest {
    const COMMAND: RdeCommand = RdeCommand::MultipartSend;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let checksum = match (self.transfer_flag.is_end(), self.checksum) {
            (true, Some(crc)) => Some(crc),
            (false, None) => None,
            (true, None) => return Err(ProtocolError::MissingChecksum),
            (false, Some(_)) => return Err(ProtocolError::UnexpectedChecksum),
        };
        let length = self.data.len() + checksum.map_or(0, |_| CHECKSUM_SIZE);
        if length > u32::MAX as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: length,
                max: u32::MAX as usize,
            });
        }

        buf.reserve(MULTIPART_SEND_FIXED_SIZE + length);
        buf.put_u32_le(self.data_transfer_handle);
        buf.put_u16_le(self.operation_id);
        buf.put_u8(self.transfer_flag.as_u8());
        buf.put_u32_le(self.next_data_transfer_handle);
        buf.put_u32_le(length as u32);
        buf.put_slice(&self.data);
        if let Some(crc) = checksum {
            buf.put_u32_le(crc);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartSendResponse {
    pub transfer_operation: TransferOperation,
}

impl RdeResponse for MultipartSendResponse {
    const COMMAND: RdeCommand = RdeCommand::MultipartSend;

    fn decode_fields(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            transfer_operation: TransferOperation::from_u8(reader.u8()?)?,
        })
    }
}

// ---------------------------------------------------------------------------
// RDEMultipartReceive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartReceiveRequest {
    pub data_transfer_handle: u32,
    pub operation_id: u16,
    pub transfer_operation: TransferOperation,
}

impl RdeRequest for MultipartReceiveRequest {
    const COMMAND: RdeCommand = RdeCommand::MultipartReceive;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32_le(self.data_transfer_handle);
        buf.put_u16_le(self.operation_id);
        buf.put_u8(self.transfer_operation.as_u8());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartReceiveResponse {
    pub transfer_flag: TransferFlag,
    pub next_data_transfer_handle: u32,
    /// Chunk content with any trailing checksum removed.
    pub data: Bytes,
    /// Present only when `transfer_flag` ends the transfer.
    pub checksum: Option<u32>,
}

impl MultipartReceiveResponse {
    /// Encodes a successful response body; used by device simulators and tests.
    pub fn encode_body(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let trailer = match (self.transfer_flag.is_end(), self.checksum) {
            (true, Some(crc)) => Some(crc),
            (false, None) => None,
            (true, None) => return Err(ProtocolError::MissingChecksum),
            (false, Some(_)) => return Err(ProtocolError::UnexpectedChecksum),
        };
        let length = self.data.len() + trailer.map_or(0, |_| CHECKSUM_SIZE);

        buf.put_u8(CompletionCode::Success.as_u8());
        buf.put_u8(self.transfer_flag.as_u8());
        buf.put_u32_le(self.next_data_transfer_handle);
        buf.put_u32_le(length as u32);
        buf.put_slice(&self.data);
        if let Some(crc) = trailer {
            buf.put_u32_le(crc);
        }
        Ok(())
    }
}

impl RdeResponse for MultipartReceiveResponse {
    const COMMAND: RdeCommand = RdeCommand::MultipartReceive;

    fn decode_fields(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let transfer_flag = TransferFlag::from_u8(reader.u8()?)?;
        let next_data_transfer_handle = reader.u32()?;
        let reported = reader.u32()? as usize;

        // The reported length counts the trailing checksum on the last chunk.
        let (data_len, has_checksum) = if transfer_flag.is_end() {
            if reported < CHECKSUM_SIZE {
                return Err(ProtocolError::InvalidLength {
                    field: "multipart data length",
                    value: reported,
                });
            }
            (reported - CHECKSUM_SIZE, true)
        } else {
            (reported, false)
        };

        let data = reader.take_bytes(data_len)?;
        let checksum = if has_checksum {
            Some(reader.u32()?)
        } else {
            None
        };

        Ok(Self {
            transfer_flag,
            next_data_transfer_handle,
            data,
            checksum,
        })
    }
}
