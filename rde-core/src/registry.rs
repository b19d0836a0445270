//! Resource registry.
//!
//! Built from the Redfish Resource PDR payloads of one device. Each record
//! contributes a node with a path segment: the proposed containing name for a
//! root record (containing resource id 0) with a non-empty name, otherwise its
//! sub-URI. Additional-resource entries contribute child nodes of the record
//! that lists them. A node's URI is its parents' URI joined with its own
//! segment; the chain ends at id 0 or at an unknown id, which resolve to
//! [`ROOT_URI`].

use crate::error::CoreError;
use rde_protocol::{schema_class, OperationType, RedfishResourcePdr};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// URI every resource chain is rooted at.
pub const ROOT_URI: &str = "/redfish/v1";

/// One resource known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub resource_id: u32,
    pub uri: String,
    pub schema_class: u8,
    pub schema_name: String,
    pub schema_version: String,
    pub operations: Vec<OperationType>,
}

/// One (resource, operation) pair reported to external clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    pub uri: String,
    pub schema_name: String,
    pub schema_version: String,
    pub operation: OperationType,
}

/// URI hierarchy and lookup indices for one device.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: BTreeMap<u32, ResourceInfo>,
    uri_to_id: HashMap<String, u32>,
    class_to_id: HashMap<u8, u32>,
    records: BTreeMap<u32, RedfishResourcePdr>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the registry from raw PDR record bodies.
    ///
    /// Empty payloads are skipped. If any payload fails to decode the
    /// registry is left empty and the error is returned.
    pub fn load_from_resource_pdr<P: AsRef<[u8]>>(
        &mut self,
        payloads: &[P],
        operations: &[OperationType],
    ) -> Result<(), CoreError> {
        self.reset();

        let mut records = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads.iter().enumerate() {
            let payload = payload.as_ref();
            if payload.is_empty() {
                continue;
            }
            let record = RedfishResourcePdr::parse(payload)
                .map_err(|source| CoreError::PdrDecode { index, source })?;
            records.push(record);
        }

        *self = Self::from_records(records, operations);
        tracing::info!("Resource registry loaded with {} resources", self.len());
        Ok(())
    }

    /// Builds a registry from decoded records.
    pub fn from_records(records: Vec<RedfishResourcePdr>, operations: &[OperationType]) -> Self {
        let mut by_id: BTreeMap<u32, RedfishResourcePdr> = BTreeMap::new();
        for record in records {
            if by_id.contains_key(&record.resource_id) {
                tracing::warn!(
                    "Duplicate resource PDR for resource {}, keeping the last one",
                    record.resource_id
                );
            }
            by_id.insert(record.resource_id, record);
        }

        let mut segments: HashMap<u32, String> = HashMap::new();
        let mut parents: HashMap<u32, u32> = HashMap::new();
        for record in by_id.values() {
            let segment = if record.is_root() && !record.proposed_containing_name.is_empty() {
                record.proposed_containing_name.clone()
            } else {
                record.sub_uri.clone()
            };
            segments.insert(record.resource_id, segment);
            parents.insert(record.resource_id, record.containing_resource_id);
        }
        // Records describe themselves better than their parents describe them.
        for record in by_id.values() {
            for add in &record.additional_resources {
                if segments.contains_key(&add.resource_id) {
                    continue;
                }
                segments.insert(add.resource_id, add.name.clone());
                parents.insert(add.resource_id, record.resource_id);
            }
        }

        let mut ids: Vec<u32> = segments.keys().copied().collect();
        ids.sort_unstable();

        let mut registry = Self {
            records: by_id,
            ..Self::default()
        };
        for id in ids {
            let uri = full_uri(id, &segments, &parents);
            let (schema_name, schema_version) = match registry.records.get(&id) {
                Some(record) => (
                    record.schema_name.clone(),
                    record.schema_version.to_string(),
                ),
                None => (String::new(), String::new()),
            };
            registry.insert(ResourceInfo {
                resource_id: id,
                uri,
                schema_class: schema_class::MAJOR,
                schema_name,
                schema_version,
                operations: operations.to_vec(),
            });
        }
        registry
    }

    fn insert(&mut self, info: ResourceInfo) {
        let key = normalize(&info.uri).to_string();
        if let Some(existing) = self.uri_to_id.get(&key) {
            tracing::warn!(
                "Resources {} and {} both resolve to {}, keeping {}",
                existing,
                info.resource_id,
                info.uri,
                existing
            );
        } else {
            self.uri_to_id.insert(key, info.resource_id);
        }
        self.class_to_id
            .entry(info.schema_class)
            .or_insert(info.resource_id);
        self.entries.insert(info.resource_id, info);
    }

    /// Replaces the operation set of every entry, e.g. after negotiation.
    pub fn set_operations(&mut self, operations: &[OperationType]) {
        for info in self.entries.values_mut() {
            info.operations = operations.to_vec();
        }
    }

    pub fn get(&self, resource_id: u32) -> Option<&ResourceInfo> {
        self.entries.get(&resource_id)
    }

    pub fn get_by_uri(&self, uri: &str) -> Result<&ResourceInfo, CoreError> {
        let id = self.resource_id_from_uri(uri)?;
        self.entries
            .get(&id)
            .ok_or_else(|| CoreError::ResourceNotFound(uri.to_string()))
    }

    pub fn get_by_schema_class(&self, class: u8) -> Result<&ResourceInfo, CoreError> {
        self.class_to_id
            .get(&class)
            .and_then(|id| self.entries.get(id))
            .ok_or_else(|| CoreError::ResourceNotFound(format!("schema class {}", class)))
    }

    pub fn resource_id_from_uri(&self, uri: &str) -> Result<u32, CoreError> {
        self.uri_to_id
            .get(normalize(uri))
            .copied()
            .ok_or_else(|| CoreError::ResourceNotFound(uri.to_string()))
    }

    pub fn uri_from_resource_id(&self, resource_id: u32) -> Result<&str, CoreError> {
        self.entries
            .get(&resource_id)
            .map(|info| info.uri.as_str())
            .ok_or_else(|| CoreError::ResourceNotFound(format!("resource {}", resource_id)))
    }

    /// Decoded PDR record for a resource, if the resource has one.
    pub fn record(&self, resource_id: u32) -> Option<&RedfishResourcePdr> {
        self.records.get(&resource_id)
    }

    /// Resource ids that carry their own PDR record, in ascending order.
    pub fn record_ids(&self) -> Vec<u32> {
        self.records.keys().copied().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ResourceInfo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.uri_to_id.clear();
        self.class_to_id.clear();
        self.records.clear();
    }

    /// One entry per (resource, supported operation).
    pub fn schema_info(&self) -> Vec<SchemaInfo> {
        self.entries
            .values()
            .flat_map(|info| {
                info.operations.iter().map(move |op| SchemaInfo {
                    uri: info.uri.clone(),
                    schema_name: info.schema_name.clone(),
                    schema_version: info.schema_version.clone(),
                    operation: *op,
                })
            })
            .collect()
    }

    /// Union of the operations of all entries.
    pub fn supported_operations(&self) -> Vec<OperationType> {
        let present: HashSet<OperationType> = self
            .entries
            .values()
            .flat_map(|info| info.operations.iter().copied())
            .collect();
        OperationType::ALL
            .iter()
            .copied()
            .filter(|op| present.contains(op))
            .collect()
    }

    /// Resource schema export keyed by resource id.
    pub fn schema_map(&self) -> Value {
        let mut resources = Map::new();
        for (id, record) in &self.records {
            resources.insert(
                id.to_string(),
                json!({
                    "ProposedContainingResourceName": record.proposed_containing_name,
                    "MajorSchemaName": record.schema_name,
                    "MajorSchemaVersion": record.schema_version.to_string(),
                    "SubURI": record.sub_uri,
                    "OEMExtensions": record.oem_names,
                }),
            );
        }
        json!({ "Resources": Value::Object(resources) })
    }

    /// Writes the entries as a JSON list.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        let entries: Vec<&ResourceInfo> = self.entries.values().collect();
        serde_json::to_writer_pretty(&mut writer, &entries)?;
        writer.flush()?;
        tracing::debug!(
            "Saved {} registry entries to {}",
            entries.len(),
            path.display()
        );
        Ok(())
    }

    /// Restores entries written by [`ResourceRegistry::save`].
    ///
    /// Decoded PDR records are not part of the dump, so a loaded registry has
    /// an empty schema map.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let reader = BufReader::new(File::open(path)?);
        let entries: Vec<ResourceInfo> = serde_json::from_reader(reader)?;
        let mut registry = Self::default();
        for info in entries {
            registry.insert(info);
        }
        Ok(registry)
    }
}

fn normalize(uri: &str) -> &str {
    match uri.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => uri,
    }
}

/// A root segment naming the service root is taken as absolute.
fn absolute_root(segment: &str) -> Option<String> {
    let trimmed = segment.trim_start_matches('/');
    let service_root = ROOT_URI.trim_start_matches('/');
    if trimmed == service_root || trimmed.starts_with(&format!("{}/", service_root)) {
        Some(format!("/{}", trimmed.trim_end_matches('/')))
    } else {
        None
    }
}

fn full_uri(id: u32, segments: &HashMap<u32, String>, parents: &HashMap<u32, u32>) -> String {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = id;
    while current != 0 {
        let Some(segment) = segments.get(&current) else {
            break;
        };
        if !seen.insert(current) {
            tracing::warn!("Resource {} has a cyclic parent chain", id);
            break;
        }
        chain.push(segment.as_str());
        current = parents.get(&current).copied().unwrap_or(0);
    }

    let mut uri = ROOT_URI.to_string();
    for (depth, segment) in chain.iter().rev().enumerate() {
        if depth == 0 {
            if let Some(root) = absolute_root(segment) {
                uri = root;
                continue;
            }
        }
        if segment.is_empty() {
            continue;
        }
        if !segment.starts_with('/') {
            uri.push('/');
        }
        uri.push_str(segment);
    }
    uri
}
