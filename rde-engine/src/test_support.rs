//! Helpers shared by the engine's unit tests: a recording transport, a JSON
//! stand-in for the BEJ codec and response builders.

use crate::config::TransferConfig;
use crate::error::EngineError;
use crate::session::SessionContext;
use crate::transport::Transport;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use rde_core::{
    BejCodec, BejDictionaries, CoreError, Metadata, PropertyNode, PropertyValue, ResourceRegistry,
};
use rde_protocol::{
    AdditionalResource, CompletionCode, PldmHeader, RdeCommand, RedfishResourcePdr, SchemaVersion,
    PLDM_HEADER_SIZE,
};
use rde_storage::DictionaryStore;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use uuid::Uuid;

/// One request handed to [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub eid: u8,
    pub instance_id: u8,
    pub command: u8,
    pub message: Bytes,
}

impl SentMessage {
    pub fn body(&self) -> &[u8] {
        &self.message[PLDM_HEADER_SIZE..]
    }

    pub fn command(&self) -> RdeCommand {
        RdeCommand::from_u8(self.command).unwrap()
    }
}

/// Transport that records every request and never answers.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<SentMessage>>,
    fail: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following send fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Drains the recorded requests.
    pub fn take(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn last(&self) -> Option<SentMessage> {
        self.sent.lock().last().cloned()
    }
}

impl Transport for MockTransport {
    fn send(&self, eid: u8, instance_id: u8, message: Bytes) -> Result<(), EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Transport("link down".to_string()));
        }
        self.sent.lock().push(SentMessage {
            eid,
            instance_id,
            command: message[2],
            message,
        });
        Ok(())
    }
}

/// Codec that writes the property tree as JSON text and reads JSON text back.
#[derive(Debug, Default)]
pub struct JsonCodec;

fn node_to_json(node: &PropertyNode) -> Value {
    match &node.value {
        PropertyValue::String(s) => Value::String(s.clone()),
        PropertyValue::Integer(i) => Value::from(*i),
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Set(children) => {
            let mut map = Map::new();
            for child in children {
                map.insert(
                    child.name().unwrap_or_default().to_string(),
                    node_to_json(child),
                );
            }
            Value::Object(map)
        }
        PropertyValue::Array(items) => Value::Array(items.iter().map(node_to_json).collect()),
    }
}

impl BejCodec for JsonCodec {
    fn encode(
        &self,
        tree: &PropertyNode,
        dictionaries: &BejDictionaries<'_>,
        _schema_class: u8,
    ) -> Result<Vec<u8>, CoreError> {
        if dictionaries.schema.is_empty() {
            return Err(CoreError::Encode("empty schema dictionary".to_string()));
        }
        Ok(serde_json::to_vec(&node_to_json(tree))?)
    }

    fn decode(
        &self,
        payload: &[u8],
        _dictionaries: &BejDictionaries<'_>,
    ) -> Result<String, CoreError> {
        String::from_utf8(payload.to_vec()).map_err(|e| CoreError::Decode(e.to_string()))
    }
}

/// Builds a full response message for `request`.
pub fn respond(request: &SentMessage, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    PldmHeader::response(request.instance_id, request.command())
        .encode(&mut buf)
        .unwrap();
    buf.put_slice(body);
    buf.to_vec()
}

/// Body carrying only a completion code.
pub fn completion(cc: CompletionCode) -> Vec<u8> {
    vec![cc.as_u8()]
}

/// Body produced by one of the `encode_body` test encoders.
pub fn encoded(f: impl FnOnce(&mut BytesMut) -> Result<(), rde_protocol::ProtocolError>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    f(&mut buf).unwrap();
    buf.to_vec()
}

/// Encoded resource PDR.
pub fn pdr(resource_id: u32, parent: u32, proposed: &str, sub_uri: &str) -> Vec<u8> {
    RedfishResourcePdr {
        resource_id,
        resource_flags: 0,
        containing_resource_id: parent,
        proposed_containing_name: proposed.to_string(),
        sub_uri: sub_uri.to_string(),
        additional_resources: Vec::<AdditionalResource>::new(),
        schema_version: SchemaVersion::new(1, 0, 0, 0),
        dictionary_length: 0,
        dictionary_signature: 0,
        schema_name: format!("Schema{}", resource_id),
        oem_names: Vec::new(),
    }
    .to_bytes()
    .unwrap()
}

/// Service root (1) with a Chassis child (2).
pub fn chassis_pdrs() -> Vec<Vec<u8>> {
    vec![pdr(1, 0, "redfish/v1", ""), pdr(2, 1, "", "Chassis")]
}

/// Device state for driving a single session by hand.
pub struct Fixture {
    pub eid: u8,
    pub metadata: Metadata,
    pub store: DictionaryStore,
    pub registry: ResourceRegistry,
    pub codec: JsonCodec,
    pub transfer: TransferConfig,
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::new();
        registry
            .load_from_resource_pdr(&chassis_pdrs(), &rde_protocol::OperationType::ALL)
            .unwrap();
        Self {
            eid: 8,
            metadata: Metadata::new(),
            store: DictionaryStore::new(dir.path(), Uuid::from_u128(0x1234)),
            registry,
            codec: JsonCodec,
            transfer: TransferConfig::default(),
            _dir: dir,
        }
    }

    pub fn ctx(&mut self) -> SessionContext<'_> {
        SessionContext {
            eid: self.eid,
            metadata: &mut self.metadata,
            store: &mut self.store,
            registry: &self.registry,
            codec: &self.codec,
            transfer: &self.transfer,
        }
    }
}
