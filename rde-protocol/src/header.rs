//! PLDM message header.
//!
//! Every RDE message starts with the 3-byte PLDM header:
//!
//! ```text
//! +----+---+----------+-------------+---------+-----------+---------+
//! | Rq | D | reserved | instance id | hdr ver | PLDM type | command |
//! | 1b | 1b|    1b    |   5 bits    | 2 bits  |  6 bits   | 8 bits  |
//! +----+---+----------+-------------+---------+-----------+---------+
//! ```
//!
//! Responses follow the header with a one-byte completion code.

use crate::error::ProtocolError;
use crate::message::RdeCommand;
use crate::PLDM_TYPE_RDE;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the PLDM header in bytes.
pub const PLDM_HEADER_SIZE: usize = 3;

/// Largest instance id representable in the header.
pub const MAX_INSTANCE_ID: u8 = 0x1F;

const REQUEST_BIT: u8 = 0x80;
const DATAGRAM_BIT: u8 = 0x40;
const INSTANCE_MASK: u8 = 0x1F;
const TYPE_MASK: u8 = 0x3F;

/// Direction of a PLDM message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    /// Unacknowledged request (Rq=1, D=1).
    Datagram,
}

/// A decoded PLDM header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PldmHeader {
    pub kind: MessageKind,
    pub instance_id: u8,
    pub pldm_type: u8,
    pub command: u8,
}

impl PldmHeader {
    /// Creates an RDE request header.
    pub fn request(instance_id: u8, command: RdeCommand) -> Self {
        Self {
            kind: MessageKind::Request,
            instance_id,
            pldm_type: PLDM_TYPE_RDE,
            command: command.as_u8(),
        }
    }

    /// Creates an RDE response header.
    pub fn response(instance_id: u8, command: RdeCommand) -> Self {
        Self {
            kind: MessageKind::Response,
            instance_id,
            pldm_type: PLDM_TYPE_RDE,
            command: command.as_u8(),
        }
    }

    /// Encodes the header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.instance_id > MAX_INSTANCE_ID {
            return Err(ProtocolError::InvalidInstanceId(self.instance_id));
        }

        let kind_bits = match self.kind {
            MessageKind::Request => REQUEST_BIT,
            MessageKind::Response => 0,
            MessageKind::Datagram => REQUEST_BIT | DATAGRAM_BIT,
        };
        buf.put_u8(kind_bits | self.instance_id);
        // Header version 0 occupies the top two bits.
        buf.put_u8(self.pldm_type & TYPE_MASK);
        buf.put_u8(self.command);
        Ok(())
    }

    /// Decodes a header from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < PLDM_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: PLDM_HEADER_SIZE,
                remaining: buf.len(),
            });
        }

        let kind = match (buf[0] & REQUEST_BIT != 0, buf[0] & DATAGRAM_BIT != 0) {
            (true, false) => MessageKind::Request,
            (true, true) => MessageKind::Datagram,
            (false, _) => MessageKind::Response,
        };

        Ok(Self {
            kind,
            instance_id: buf[0] & INSTANCE_MASK,
            pldm_type: buf[1] & TYPE_MASK,
            command: buf[2],
        })
    }
}

/// Builds a complete request message: header followed by `body`.
pub fn encode_request(
    instance_id: u8,
    command: RdeCommand,
    body: &[u8],
) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(PLDM_HEADER_SIZE + body.len());
    PldmHeader::request(instance_id, command).encode(&mut buf)?;
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Validates a response header against the request it answers.
///
/// Returns the message body, which begins with the completion code.
pub fn split_response(
    msg: &[u8],
    instance_id: u8,
    command: RdeCommand,
) -> Result<&[u8], ProtocolError> {
    let header = PldmHeader::decode(msg)?;

    if header.kind != MessageKind::Response {
        return Err(ProtocolError::NotAResponse);
    }
    if header.pldm_type != PLDM_TYPE_RDE {
        return Err(ProtocolError::UnexpectedPldmType(header.pldm_type));
    }
    if header.command != command.as_u8() {
        return Err(ProtocolError::UnexpectedCommand {
            expected: command.as_u8(),
            actual: header.command,
        });
    }
    if header.instance_id != instance_id {
        return Err(ProtocolError::InstanceMismatch {
            expected: instance_id,
            actual: header.instance_id,
        });
    }

    Ok(&msg[PLDM_HEADER_SIZE..])
}
