//! Redfish Resource PDR record body.
//!
//! Layout (all integers little-endian, `str` = `u16` length + raw bytes):
//!
//! ```text
//! +-------------+-------+--------------+----------------+---------+
//! | resource id | flags | container id | container name | sub-URI |
//! |   4 bytes   |  1    |   4 bytes    |      str       |   str   |
//! +-------------+-------+--------------+----------------+---------+
//! | add. count  | {add. id: 4 bytes, add. name: str} * add. count |
//! +-------------+----------------+-----------+------------------+
//! | schema ver  | dict length    | dict sig  | schema name      |
//! |   4 bytes   |   2 bytes      |  4 bytes  |    str           |
//! +-------------+----------------+-----------+------------------+
//! | OEM count (2 bytes) | OEM name: str * OEM count              |
//! +---------------------+----------------------------------------+
//! ```
//!
//! Any read past the end of the buffer fails the whole record.

use crate::error::ProtocolError;
use crate::message::Reader;
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Major schema version as four raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaVersion {
    pub major: u8,
    pub minor: u8,
    pub update: u8,
    pub alpha: u8,
}

impl SchemaVersion {
    /// Version value meaning "not specified".
    pub const UNSPECIFIED: SchemaVersion = SchemaVersion {
        major: 0xFF,
        minor: 0xFF,
        update: 0xFF,
        alpha: 0xFF,
    };

    pub fn new(major: u8, minor: u8, update: u8, alpha: u8) -> Self {
        Self {
            major,
            minor,
            update,
            alpha,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unspecified() {
            return write!(f, "?.?");
        }
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.update, self.alpha
        )
    }
}

/// A child resource announced by its owning record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalResource {
    pub resource_id: u32,
    pub name: String,
}

/// Decoded Redfish Resource PDR record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedfishResourcePdr {
    pub resource_id: u32,
    pub resource_flags: u8,
    /// Zero for records without a containing resource on the device.
    pub containing_resource_id: u32,
    pub proposed_containing_name: String,
    pub sub_uri: String,
    pub additional_resources: Vec<AdditionalResource>,
    pub schema_version: SchemaVersion,
    pub dictionary_length: u16,
    pub dictionary_signature: u32,
    pub schema_name: String,
    pub oem_names: Vec<String>,
}

impl RedfishResourcePdr {
    /// Returns whether this record has no containing resource.
    pub fn is_root(&self) -> bool {
        self.containing_resource_id == 0
    }

    /// Parses a record body.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(buf);

        let resource_id = reader.u32()?;
        let resource_flags = reader.u8()?;
        let containing_resource_id = reader.u32()?;
        let proposed_containing_name = read_string(&mut reader)?;
        let sub_uri = read_string(&mut reader)?;

        let add_count = reader.u16()?;
        let mut additional_resources = Vec::with_capacity(add_count.min(64) as usize);
        for _ in 0..add_count {
            additional_resources.push(AdditionalResource {
                resource_id: reader.u32()?,
                name: read_string(&mut reader)?,
            });
        }

        let [major, minor, update, alpha] = reader.array::<4>()?;
        let dictionary_length = reader.u16()?;
        let dictionary_signature = reader.u32()?;
        let schema_name = read_string(&mut reader)?;

        let oem_count = reader.u16()?;
        let mut oem_names = Vec::with_capacity(oem_count.min(64) as usize);
        for _ in 0..oem_count {
            oem_names.push(read_string(&mut reader)?);
        }

        Ok(Self {
            resource_id,
            resource_flags,
            containing_resource_id,
            proposed_containing_name,
            sub_uri,
            additional_resources,
            schema_version: SchemaVersion::new(major, minor, update, alpha),
            dictionary_length,
            dictionary_signature,
            schema_name,
            oem_names,
        })
    }

    /// Encodes the record body.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        buf.put_u32_le(self.resource_id);
        buf.put_u8(self.resource_flags);
        buf.put_u32_le(self.containing_resource_id);
        write_string(buf, &self.proposed_containing_name)?;
        write_string(buf, &self.sub_uri)?;

        buf.put_u16_le(count_u16("additional resources", self.additional_resources.len())?);
        for add in &self.additional_resources {
            buf.put_u32_le(add.resource_id);
            write_string(buf, &add.name)?;
        }

        buf.put_u8(self.schema_version.major);
        buf.put_u8(self.schema_version.minor);
        buf.put_u8(self.schema_version.update);
        buf.put_u8(self.schema_version.alpha);
        buf.put_u16_le(self.dictionary_length);
        buf.put_u32_le(self.dictionary_signature);
        write_string(buf, &self.schema_name)?;

        buf.put_u16_le(count_u16("OEM names", self.oem_names.len())?);
        for oem in &self.oem_names {
            write_string(buf, oem)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.to_vec())
    }
}

fn read_string(reader: &mut Reader<'_>) -> Result<String, ProtocolError> {
    let len = reader.u16()? as usize;
    let raw = reader.take(len)?;
    // Some devices include a NUL terminator in the length.
    let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
    if raw.contains(&0) {
        return Err(ProtocolError::EmbeddedNul("PDR string"));
    }
    let value = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8("PDR string"))?;
    Ok(value.to_string())
}

fn write_string(buf: &mut BytesMut, value: &str) -> Result<(), ProtocolError> {
    if value.contains('\0') {
        return Err(ProtocolError::EmbeddedNul("PDR string"));
    }
    buf.put_u16_le(count_u16("string", value.len())?);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn count_u16(field: &'static str, len: usize) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::InvalidLength { field, value: len })
}
