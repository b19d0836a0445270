//! JSON to BEJ property tree bridge.
//!
//! The bit-level BEJ encoding lives behind [`BejCodec`]. This module only
//! builds the property tree handed to an encoder and carries the dictionaries
//! an implementation needs.

use crate::error::CoreError;
use serde_json::Value;

/// Name of the root set when the payload carries no usable `@odata.type`.
pub const DEFAULT_ROOT_NAME: &str = "Root";

/// Value held by a property tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Bool(bool),
    Set(Vec<PropertyNode>),
    Array(Vec<PropertyNode>),
}

/// A node of the property tree. Array elements have no name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyNode {
    pub name: Option<String>,
    pub value: PropertyValue,
}

impl PropertyNode {
    pub fn named(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }

    pub fn anonymous(value: PropertyValue) -> Self {
        Self { name: None, value }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Children of a set or array; empty for leaves.
    pub fn children(&self) -> &[PropertyNode] {
        match &self.value {
            PropertyValue::Set(children) | PropertyValue::Array(children) => children,
            _ => &[],
        }
    }

    /// Finds a direct child by name.
    pub fn child(&self, name: &str) -> Option<&PropertyNode> {
        self.children()
            .iter()
            .find(|child| child.name.as_deref() == Some(name))
    }
}

/// Name of the root set, taken from `@odata.type` (`#Name.vX_Y_Z.Name`).
pub fn root_object_name(json: &Value) -> String {
    json.get("@odata.type")
        .and_then(Value::as_str)
        .and_then(|odata_type| {
            let (_, after_hash) = odata_type.split_once('#')?;
            let (name, _) = after_hash.split_once('.')?;
            Some(name.to_string())
        })
        .unwrap_or_else(|| DEFAULT_ROOT_NAME.to_string())
}

/// Builds a named set from a JSON object.
///
/// Strings, integers that fit `i64` and booleans become leaves, objects
/// become sets and arrays become arrays of anonymous elements. Anything else
/// is logged and left out.
pub fn json_to_tree(name: Option<&str>, object: &serde_json::Map<String, Value>) -> PropertyNode {
    let mut children = Vec::with_capacity(object.len());
    for (key, value) in object {
        match value {
            Value::Array(elements) => {
                let items = elements
                    .iter()
                    .filter_map(|element| array_element(key, element))
                    .collect();
                children.push(PropertyNode::named(key, PropertyValue::Array(items)));
            }
            Value::Object(nested) => children.push(json_to_tree(Some(key), nested)),
            other => {
                if let Some(leaf) = leaf_value(other) {
                    children.push(PropertyNode::named(key, leaf));
                } else {
                    tracing::warn!("Skipping property {} with unsupported value {}", key, other);
                }
            }
        }
    }

    PropertyNode {
        name: name.map(str::to_string),
        value: PropertyValue::Set(children),
    }
}

fn array_element(key: &str, element: &Value) -> Option<PropertyNode> {
    match element {
        Value::Object(nested) => Some(json_to_tree(None, nested)),
        other => match leaf_value(other) {
            Some(leaf) => Some(PropertyNode::anonymous(leaf)),
            None => {
                tracing::warn!(
                    "Skipping element of array {} with unsupported value {}",
                    key,
                    other
                );
                None
            }
        },
    }
}

fn leaf_value(value: &Value) -> Option<PropertyValue> {
    match value {
        Value::String(s) => Some(PropertyValue::String(s.clone())),
        Value::Bool(b) => Some(PropertyValue::Bool(*b)),
        Value::Number(n) => n.as_i64().map(PropertyValue::Integer),
        _ => None,
    }
}

/// Parses a request body and builds its property tree.
pub fn tree_from_json_str(text: &str) -> Result<PropertyNode, CoreError> {
    let json: Value =
        serde_json::from_str(text).map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
    let object = json
        .as_object()
        .ok_or_else(|| CoreError::InvalidPayload("payload is not a JSON object".to_string()))?;
    let root = root_object_name(&json);
    Ok(json_to_tree(Some(&root), object))
}

/// Dictionaries handed to a codec for one encode or decode.
#[derive(Debug, Clone, Copy)]
pub struct BejDictionaries<'a> {
    pub schema: &'a [u8],
    pub annotation: &'a [u8],
}

/// BEJ encoder and decoder.
pub trait BejCodec: Send + Sync {
    /// Encodes a property tree into a BEJ payload.
    fn encode(
        &self,
        tree: &PropertyNode,
        dictionaries: &BejDictionaries<'_>,
        schema_class: u8,
    ) -> Result<Vec<u8>, CoreError>;

    /// Decodes a BEJ payload into JSON text.
    fn decode(
        &self,
        payload: &[u8],
        dictionaries: &BejDictionaries<'_>,
    ) -> Result<String, CoreError>;
}
