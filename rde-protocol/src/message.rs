//! RDE command identifiers, enumerations, and bitfields shared by the codecs.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// RDE command codes (DSP0218).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RdeCommand {
    NegotiateRedfishParameters,
    NegotiateMediumParameters,
    GetSchemaDictionary,
    GetSchemaUri,
    GetResourceEtag,
    OperationInit,
    SupplyCustomRequestParameters,
    RetrieveCustomResponseParameters,
    OperationComplete,
    OperationStatus,
    OperationKill,
    OperationEnumerate,
    MultipartSend,
    MultipartReceive,
}

impl RdeCommand {
    pub fn as_u8(&self) -> u8 {
        match self {
            RdeCommand::NegotiateRedfishParameters => 0x01,
            RdeCommand::NegotiateMediumParameters => 0x02,
            RdeCommand::GetSchemaDictionary => 0x03,
            RdeCommand::GetSchemaUri => 0x04,
            RdeCommand::GetResourceEtag => 0x05,
            RdeCommand::OperationInit => 0x10,
            RdeCommand::SupplyCustomRequestParameters => 0x11,
            RdeCommand::RetrieveCustomResponseParameters => 0x12,
            RdeCommand::OperationComplete => 0x13,
            RdeCommand::OperationStatus => 0x14,
            RdeCommand::OperationKill => 0x15,
            RdeCommand::OperationEnumerate => 0x16,
            RdeCommand::MultipartSend => 0x30,
            RdeCommand::MultipartReceive => 0x31,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x01 => RdeCommand::NegotiateRedfishParameters,
            0x02 => RdeCommand::NegotiateMediumParameters,
            0x03 => RdeCommand::GetSchemaDictionary,
            0x04 => RdeCommand::GetSchemaUri,
            0x05 => RdeCommand::GetResourceEtag,
            0x10 => RdeCommand::OperationInit,
            0x11 => RdeCommand::SupplyCustomRequestParameters,
            0x12 => RdeCommand::RetrieveCustomResponseParameters,
            0x13 => RdeCommand::OperationComplete,
            0x14 => RdeCommand::OperationStatus,
            0x15 => RdeCommand::OperationKill,
            0x16 => RdeCommand::OperationEnumerate,
            0x30 => RdeCommand::MultipartSend,
            0x31 => RdeCommand::MultipartReceive,
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }
}

impl fmt::Display for RdeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Position of a chunk within a multipart transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFlag {
    Start,
    Middle,
    End,
    StartAndEnd,
}

impl TransferFlag {
    pub fn as_u8(&self) -> u8 {
        match self {
            TransferFlag::Start => 0,
            TransferFlag::Middle => 1,
            TransferFlag::End => 2,
            TransferFlag::StartAndEnd => 3,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(TransferFlag::Start),
            1 => Ok(TransferFlag::Middle),
            2 => Ok(TransferFlag::End),
            3 => Ok(TransferFlag::StartAndEnd),
            other => Err(ProtocolError::InvalidTransferFlag(other)),
        }
    }

    /// Flag for a chunk given whether it is the first and/or last of the transfer.
    pub fn for_chunk(first: bool, last: bool) -> Self {
        match (first, last) {
            (true, true) => TransferFlag::StartAndEnd,
            (true, false) => TransferFlag::Start,
            (false, true) => TransferFlag::End,
            (false, false) => TransferFlag::Middle,
        }
    }

    /// Returns whether this chunk ends the transfer and carries a checksum.
    pub fn is_end(&self) -> bool {
        matches!(self, TransferFlag::End | TransferFlag::StartAndEnd)
    }
}

/// Transfer operation requested by (receive) or echoed by (send) the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOperation {
    FirstPart,
    NextPart,
    Abort,
    Complete,
}

impl TransferOperation {
    pub fn as_u8(&self) -> u8 {
        match self {
            TransferOperation::FirstPart => 0,
            TransferOperation::NextPart => 1,
            TransferOperation::Abort => 2,
            TransferOperation::Complete => 3,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(TransferOperation::FirstPart),
            1 => Ok(TransferOperation::NextPart),
            2 => Ok(TransferOperation::Abort),
            3 => Ok(TransferOperation::Complete),
            other => Err(ProtocolError::InvalidTransferOperation(other)),
        }
    }
}

/// Redfish operation carried by RDEOperationInit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Head,
    Read,
    Create,
    Delete,
    Update,
    Replace,
    Action,
}

impl OperationType {
    pub const ALL: [OperationType; 7] = [
        OperationType::Head,
        OperationType::Read,
        OperationType::Create,
        OperationType::Delete,
        OperationType::Update,
        OperationType::Replace,
        OperationType::Action,
    ];

    pub fn as_u8(&self) -> u8 {
        match self {
            OperationType::Head => 0,
            OperationType::Read => 1,
            OperationType::Create => 2,
            OperationType::Delete => 3,
            OperationType::Update => 4,
            OperationType::Replace => 5,
            OperationType::Action => 6,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(ProtocolError::InvalidOperationType(value))
    }

    /// Returns whether the operation sends a request body to the device.
    pub fn carries_request_payload(&self) -> bool {
        matches!(
            self,
            OperationType::Create
                | OperationType::Update
                | OperationType::Replace
                | OperationType::Action
        )
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Head => "HEAD",
            OperationType::Read => "READ",
            OperationType::Create => "CREATE",
            OperationType::Delete => "DELETE",
            OperationType::Update => "UPDATE",
            OperationType::Replace => "REPLACE",
            OperationType::Action => "ACTION",
        };
        write!(f, "{}", name)
    }
}

/// OperationFlags bitfield of RDEOperationInit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationFlags(u8);

impl OperationFlags {
    pub const LOCATOR_VALID: u8 = 1 << 0;
    pub const CONTAINS_REQUEST_PAYLOAD: u8 = 1 << 1;
    pub const CONTAINS_CUSTOM_REQUEST_PARAMETERS: u8 = 1 << 2;
    pub const EXCERPT_READ: u8 = 1 << 3;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_locator(mut self) -> Self {
        self.0 |= Self::LOCATOR_VALID;
        self
    }

    pub fn with_request_payload(mut self) -> Self {
        self.0 |= Self::CONTAINS_REQUEST_PAYLOAD;
        self
    }

    pub fn has_request_payload(&self) -> bool {
        self.0 & Self::CONTAINS_REQUEST_PAYLOAD != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

/// Redfish feature bitmask exchanged by NegotiateRedfishParameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FeatureSupport(u16);

impl FeatureSupport {
    pub const HEAD: u16 = 1 << 0;
    pub const READ: u16 = 1 << 1;
    pub const CREATE: u16 = 1 << 2;
    pub const DELETE: u16 = 1 << 3;
    pub const UPDATE: u16 = 1 << 4;
    pub const REPLACE: u16 = 1 << 5;
    pub const ACTION: u16 = 1 << 6;
    pub const EVENTS: u16 = 1 << 7;
    pub const BEJ_V1_1: u16 = 1 << 8;

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, bits: u16) -> bool {
        self.0 & bits == bits
    }

    /// Bit corresponding to an operation type.
    pub fn bit_for(op: OperationType) -> u16 {
        1 << op.as_u8()
    }

    pub fn supports(&self, op: OperationType) -> bool {
        self.contains(Self::bit_for(op))
    }

    /// Operation types whose feature bits are set.
    pub fn operations(&self) -> Vec<OperationType> {
        OperationType::ALL
            .iter()
            .copied()
            .filter(|op| self.supports(*op))
            .collect()
    }
}

/// DeviceCapabilitiesFlags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities(u8);

impl DeviceCapabilities {
    pub const ATOMIC_RESOURCE_READ: u8 = 1 << 0;
    pub const EXPAND_SUPPORT: u8 = 1 << 1;
    pub const BEJ_V1_1: u8 = 1 << 2;

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn atomic_resource_read(&self) -> bool {
        self.0 & Self::ATOMIC_RESOURCE_READ != 0
    }

    pub fn expand_support(&self) -> bool {
        self.0 & Self::EXPAND_SUPPORT != 0
    }

    pub fn bej_v1_1(&self) -> bool {
        self.0 & Self::BEJ_V1_1 != 0
    }
}

/// Device-side operation status reported in operation responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Inactive,
    NeedsInput,
    Triggered,
    Running,
    HaveResults,
    Completed,
    Failed,
    Abandoned,
    Unknown(u8),
}

impl OperationStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => OperationStatus::Inactive,
            1 => OperationStatus::NeedsInput,
            2 => OperationStatus::Triggered,
            3 => OperationStatus::Running,
            4 => OperationStatus::HaveResults,
            5 => OperationStatus::Completed,
            6 => OperationStatus::Failed,
            7 => OperationStatus::Abandoned,
            other => OperationStatus::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OperationStatus::Inactive => 0,
            OperationStatus::NeedsInput => 1,
            OperationStatus::Triggered => 2,
            OperationStatus::Running => 3,
            OperationStatus::HaveResults => 4,
            OperationStatus::Completed => 5,
            OperationStatus::Failed => 6,
            OperationStatus::Abandoned => 7,
            OperationStatus::Unknown(value) => *value,
        }
    }

    /// Returns whether the device reports the operation as failed or abandoned.
    pub fn is_failure(&self) -> bool {
        matches!(self, OperationStatus::Failed | OperationStatus::Abandoned)
    }
}

/// Schema classes addressed by GetSchemaDictionary.
pub mod schema_class {
    pub const MAJOR: u8 = 0;
    pub const EVENT: u8 = 1;
    pub const ANNOTATION: u8 = 2;
    pub const COLLECTION_MEMBER_TYPE: u8 = 3;
    pub const ERROR: u8 = 4;
    pub const REGISTRY: u8 = 5;
}

/// Character encodings of a `varstring`.
pub mod string_format {
    pub const ASCII: u8 = 1;
    pub const UTF8: u8 = 2;
    pub const UTF16: u8 = 3;
    pub const UTF16LE: u8 = 4;
    pub const UTF16BE: u8 = 5;
}

/// PLDM `varstring`: format, length including the NUL terminator, bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarString {
    pub format: u8,
    pub value: String,
}

impl VarString {
    pub fn utf8(value: impl Into<String>) -> Self {
        Self {
            format: string_format::UTF8,
            value: value.into(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = self.value.len() + 1;
        if len > u8::MAX as usize {
            return Err(ProtocolError::InvalidLength {
                field: "varstring",
                value: len,
            });
        }
        buf.put_u8(self.format);
        buf.put_u8(len as u8);
        buf.put_slice(self.value.as_bytes());
        buf.put_u8(0);
        Ok(())
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let format = reader.u8()?;
        let len = reader.u8()? as usize;
        let raw = reader.take(len)?;
        let trimmed = match raw.iter().position(|b| *b == 0) {
            Some(nul) => &raw[..nul],
            None => raw,
        };
        let value = std::str::from_utf8(trimmed)
            .map_err(|_| ProtocolError::InvalidUtf8("varstring"))?
            .to_string();
        Ok(Self { format, value })
    }
}

/// Bounds-checked little-endian cursor over a received buffer.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.len() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn take_bytes(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        self.take(len).map(Bytes::copy_from_slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.take(len).map(|_| ())
    }

    /// Returns everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }
}
