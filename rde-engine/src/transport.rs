//! Transport seam and instance id allocation.
//!
//! The engine never touches MCTP. It hands complete PLDM request messages to
//! a [`Transport`] and is told about responses through
//! [`crate::manager::ManagerHandle::deliver_response`]. The transport owes
//! exactly one response (or a failure sentinel) per request it accepted.

use crate::error::EngineError;
use bytes::Bytes;
use parking_lot::Mutex;
use rde_protocol::MAX_INSTANCE_ID;
use std::collections::HashMap;

/// Sends PLDM request messages to endpoints.
pub trait Transport: Send + Sync {
    /// Queues one request. An error means the request will not be answered.
    fn send(&self, eid: u8, instance_id: u8, message: Bytes) -> Result<(), EngineError>;
}

const POOL_SIZE: usize = MAX_INSTANCE_ID as usize + 1;

#[derive(Debug)]
struct EndpointIds {
    in_use: [bool; POOL_SIZE],
    /// Next id to try; allocation rotates so ids are not reused back to back.
    cursor: usize,
}

impl Default for EndpointIds {
    fn default() -> Self {
        Self {
            in_use: [false; POOL_SIZE],
            cursor: 0,
        }
    }
}

/// Per-endpoint PLDM instance id pool (0..=31).
#[derive(Debug, Default)]
pub struct InstanceIdDb {
    endpoints: Mutex<HashMap<u8, EndpointIds>>,
}

impl InstanceIdDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a free instance id for `eid`.
    pub fn allocate(&self, eid: u8) -> Result<u8, EngineError> {
        let mut endpoints = self.endpoints.lock();
        let ids = endpoints.entry(eid).or_default();
        for offset in 0..POOL_SIZE {
            let candidate = (ids.cursor + offset) % POOL_SIZE;
            if !ids.in_use[candidate] {
                ids.in_use[candidate] = true;
                ids.cursor = (candidate + 1) % POOL_SIZE;
                return Ok(candidate as u8);
            }
        }
        Err(EngineError::InstanceIdExhausted(eid))
    }

    /// Returns an instance id to the pool. Freeing a free id is a no-op.
    pub fn free(&self, eid: u8, instance_id: u8) {
        let mut endpoints = self.endpoints.lock();
        match endpoints.get_mut(&eid) {
            Some(ids) if (instance_id as usize) < POOL_SIZE => {
                if !ids.in_use[instance_id as usize] {
                    tracing::warn!("EID {}: instance id {} freed twice", eid, instance_id);
                }
                ids.in_use[instance_id as usize] = false;
            }
            _ => tracing::warn!("EID {}: freeing unknown instance id {}", eid, instance_id),
        }
    }

    /// Number of ids currently allocated for `eid`.
    pub fn in_use(&self, eid: u8) -> usize {
        self.endpoints
            .lock()
            .get(&eid)
            .map(|ids| ids.in_use.iter().filter(|used| **used).count())
            .unwrap_or(0)
    }

    /// Forgets every allocation for `eid`.
    pub fn release_endpoint(&self, eid: u8) {
        self.endpoints.lock().remove(&eid);
    }
}
