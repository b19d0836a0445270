//! # rde-core
//!
//! Device model for the RDE management controller.
//!
//! This crate provides:
//! - The resource registry rebuilt from Redfish Resource PDRs
//! - Typed negotiated metadata
//! - The JSON to BEJ property tree bridge and the codec trait

pub mod bej;
pub mod error;
pub mod metadata;
pub mod registry;

pub use bej::{
    json_to_tree, root_object_name, tree_from_json_str, BejCodec, BejDictionaries, PropertyNode,
    PropertyValue,
};
pub use error::CoreError;
pub use metadata::{Metadata, MetadataField, MetadataKey};
pub use registry::{ResourceInfo, ResourceRegistry, SchemaInfo, ROOT_URI};
