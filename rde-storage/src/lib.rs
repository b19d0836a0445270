//! # rde-storage
//!
//! Schema dictionary storage for RDE devices.
//!
//! This crate provides:
//! - Append-only dictionary buffers keyed by resource id and schema class
//! - Checksummed on-disk dictionary files scoped by device UUID
//! - Reload of persisted dictionaries across restarts
//! - Annotation dictionary loading from a local blob

pub mod dictionary;
pub mod error;
pub mod store;

pub use dictionary::{Dictionary, DictionaryKey, DICTIONARY_HEADER_SIZE, DICTIONARY_MAGIC};
pub use error::StorageError;
pub use store::DictionaryStore;
