//! Schema dictionary buffer and its on-disk form.
//!
//! Each persisted dictionary file has the following layout:
//!
//! ```text
//! +---------+---------+-------------+--------------+----------+--------+--------+
//! | magic   | version | resource id | schema class | complete | length | crc32c |
//! | 4 bytes | 2 bytes |   4 bytes   |    1 byte    |  1 byte  | 4 bytes| 4 bytes|
//! +---------+---------+-------------+--------------+----------+--------+--------+
//! | dictionary content (length bytes)                                          |
//! +-----------------------------------------------------------------------------+
//! ```
//!
//! Integers are little-endian.

use crate::error::StorageError;
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for dictionary files: "RDED"
pub const DICTIONARY_MAGIC: [u8; 4] = *b"RDED";

/// Current dictionary file format version.
pub const DICTIONARY_FORMAT_VERSION: u16 = 1;

/// Size of the dictionary file header (4+2+4+1+1+4+4 = 20).
pub const DICTIONARY_HEADER_SIZE: usize = 20;

/// Identifies a dictionary within one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DictionaryKey {
    pub resource_id: u32,
    pub schema_class: u8,
}

impl DictionaryKey {
    /// Reserved key of the device-wide annotation dictionary.
    pub const ANNOTATION: DictionaryKey = DictionaryKey {
        resource_id: 0,
        schema_class: 0,
    };

    pub fn new(resource_id: u32, schema_class: u8) -> Self {
        Self {
            resource_id,
            schema_class,
        }
    }

    pub fn is_annotation(&self) -> bool {
        *self == Self::ANNOTATION
    }

    /// File name used when the dictionary is persisted.
    pub fn file_name(&self) -> String {
        if self.is_annotation() {
            "annotation.bin".to_string()
        } else {
            format!(
                "dictionary_{}_{}.bin",
                self.resource_id, self.schema_class
            )
        }
    }
}

impl fmt::Display for DictionaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.resource_id, self.schema_class)
    }
}

/// An append-only dictionary buffer.
///
/// Bytes can be appended only while the dictionary is incomplete.
#[derive(Debug, Clone)]
pub struct Dictionary {
    key: DictionaryKey,
    data: Vec<u8>,
    complete: bool,
    path: PathBuf,
}

impl Dictionary {
    pub fn new(key: DictionaryKey, path: impl Into<PathBuf>) -> Self {
        Self {
            key,
            data: Vec::new(),
            complete: false,
            path: path.into(),
        }
    }

    /// Builds a complete dictionary from content already assembled elsewhere.
    pub fn from_content(key: DictionaryKey, path: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        Self {
            key,
            data,
            complete: true,
            path: path.into(),
        }
    }

    pub fn key(&self) -> DictionaryKey {
        self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends bytes to an incomplete dictionary.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if self.complete {
            return Err(StorageError::DictionaryComplete {
                resource_id: self.key.resource_id,
                schema_class: self.key.schema_class,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Encodes the dictionary in file form.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(DICTIONARY_HEADER_SIZE + self.data.len());
        buf.put_slice(&DICTIONARY_MAGIC);
        buf.put_u16_le(DICTIONARY_FORMAT_VERSION);
        buf.put_u32_le(self.key.resource_id);
        buf.put_u8(self.key.schema_class);
        buf.put_u8(u8::from(self.complete));
        buf.put_u32_le(self.data.len() as u32);
        buf.put_u32_le(crc32c::crc32c(&self.data));
        buf.put_slice(&self.data);
        buf
    }

    /// Decodes a dictionary file read from `path`.
    pub fn decode(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self, StorageError> {
        let path = path.into();
        let corrupt = |reason: String| StorageError::Corruption {
            path: path.clone(),
            reason,
        };

        if bytes.len() < DICTIONARY_HEADER_SIZE {
            return Err(corrupt(format!(
                "file too short: {} bytes",
                bytes.len()
            )));
        }

        let mut buf = bytes;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != DICTIONARY_MAGIC {
            return Err(corrupt(format!("invalid magic: {:?}", magic)));
        }

        let version = buf.get_u16_le();
        if version != DICTIONARY_FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", version)));
        }

        let key = DictionaryKey::new(buf.get_u32_le(), buf.get_u8());
        let complete = buf.get_u8() != 0;
        let length = buf.get_u32_le() as usize;
        let expected = buf.get_u32_le();

        if buf.remaining() != length {
            return Err(corrupt(format!(
                "length mismatch: header says {}, found {}",
                length,
                buf.remaining()
            )));
        }

        let actual = crc32c::crc32c(buf);
        if actual != expected {
            return Err(corrupt(format!(
                "CRC mismatch: expected {:#x}, got {:#x}",
                expected, actual
            )));
        }

        Ok(Self {
            key,
            data: buf.to_vec(),
            complete,
            path,
        })
    }

    /// Writes the dictionary to its path, creating parent directories.
    pub fn save(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let encoded = self.encode();
        let tmp_path = self.path.with_extension("bin.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(
            "Saved dictionary {} ({} bytes) to {}",
            self.key,
            self.data.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Loads a dictionary previously written by [`Dictionary::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::decode(path, &bytes)
    }

    /// Removes the persisted file, if any.
    pub fn remove_file(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_file_names() {
        assert_eq!(DictionaryKey::new(7, 0).file_name(), "dictionary_7_0.bin");
        assert_eq!(DictionaryKey::ANNOTATION.file_name(), "annotation.bin");
        assert!(DictionaryKey::new(0, 0).is_annotation());
        assert!(!DictionaryKey::new(0, 2).is_annotation());
    }

    #[test]
    fn test_append_after_complete_rejected() {
        let mut dict = Dictionary::new(DictionaryKey::new(1, 0), "/nonexistent/d.bin");
        dict.append(b"abc").unwrap();
        dict.mark_complete();

        let err = dict.append(b"def").unwrap_err();
        assert!(matches!(err, StorageError::DictionaryComplete { .. }));
        assert_eq!(dict.data(), b"abc");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dictionary_3_0.bin");

        let mut dict = Dictionary::new(DictionaryKey::new(3, 0), &path);
        dict.append(&[0x00, 0x01, 0xFE, 0xFF]).unwrap();
        dict.mark_complete();
        dict.save().unwrap();

        let loaded = Dictionary::load(&path).unwrap();
        assert_eq!(loaded.key(), DictionaryKey::new(3, 0));
        assert!(loaded.is_complete());
        assert_eq!(loaded.data(), &[0x00, 0x01, 0xFE, 0xFF]);
        assert_eq!(loaded.path(), path.as_path());
    }

    #[test]
    fn test_load_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dictionary_1_0.bin");

        let dict = Dictionary::from_content(DictionaryKey::new(1, 0), &path, vec![1, 2, 3, 4]);
        dict.save().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            Dictionary::load(&path),
            Err(StorageError::Corruption { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_short_and_bad_magic() {
        assert!(matches!(
            Dictionary::decode("x.bin", &[0u8; 5]),
            Err(StorageError::Corruption { .. })
        ));

        let mut bytes = Dictionary::from_content(DictionaryKey::new(1, 0), "x.bin", vec![9])
            .encode()
            .to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            Dictionary::decode("x.bin", &bytes),
            Err(StorageError::Corruption { .. })
        ));
    }

    #[test]
    fn test_remove_missing_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let dict = Dictionary::new(DictionaryKey::new(1, 0), dir.path().join("none.bin"));
        dict.remove_file().unwrap();
    }
}
