//! RDE manager - owns every device and serializes all engine work on one
//! tokio task.
//!
//! Callers talk to the manager through a cloneable [`ManagerHandle`]. Each
//! call becomes a [`ManagerEvent`] on an mpsc channel; replies come back on
//! oneshot channels.

use crate::config::Config;
use crate::device::{Device, OperationCompletion, Shared};
use crate::error::EngineError;
use crate::operation::{OperationRequest, OperationResult};
use crate::session::SessionId;
use crate::state::DeviceState;
use crate::transport::{InstanceIdDb, Transport};
use bytes::Bytes;
use rde_core::{BejCodec, SchemaInfo};
use rde_protocol::OperationType;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Work items processed by the manager task.
#[derive(Debug)]
pub enum ManagerEvent {
    /// Discovery found an RDE endpoint, or found it again.
    EndpointDiscovered {
        eid: u8,
        uuid: Uuid,
        tid: u8,
        pdr_payloads: Vec<Vec<u8>>,
    },
    /// A response, or `None` when the transport gave up on the request.
    Response {
        eid: u8,
        instance_id: u8,
        message: Option<Bytes>,
    },
    PerformOperation {
        eid: u8,
        request: OperationRequest,
        started: oneshot::Sender<SessionId>,
        done: Reply<OperationResult>,
    },
    /// The caller stopped waiting for an operation.
    Expire { eid: u8, session: SessionId },
    SchemaInfo {
        eid: u8,
        reply: Reply<Vec<SchemaInfo>>,
    },
    SupportedOperations {
        eid: u8,
        reply: Reply<Vec<OperationType>>,
    },
    DeviceState {
        eid: u8,
        reply: Reply<DeviceState>,
    },
    RemoveEndpoint { eid: u8 },
    Shutdown,
}

/// Cloneable front end of a running [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerEvent>,
    operation_timeout: Duration,
}

impl ManagerHandle {
    async fn send(&self, event: ManagerEvent) -> Result<(), EngineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| EngineError::ShuttingDown)
    }

    async fn call<T>(
        &self,
        event: impl FnOnce(Reply<T>) -> ManagerEvent,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(event(reply)).await?;
        rx.await.map_err(|_| EngineError::ShuttingDown)?
    }

    /// Registers an endpoint (or refreshes a known one) and starts discovery.
    pub async fn endpoint_discovered(
        &self,
        eid: u8,
        uuid: Uuid,
        tid: u8,
        pdr_payloads: Vec<Vec<u8>>,
    ) -> Result<(), EngineError> {
        self.send(ManagerEvent::EndpointDiscovered {
            eid,
            uuid,
            tid,
            pdr_payloads,
        })
        .await
    }

    /// Hands a response from the transport to the engine.
    pub async fn deliver_response(
        &self,
        eid: u8,
        instance_id: u8,
        message: Option<Bytes>,
    ) -> Result<(), EngineError> {
        self.send(ManagerEvent::Response {
            eid,
            instance_id,
            message,
        })
        .await
    }

    /// Runs one operation and waits for its result.
    ///
    /// If no result arrives within the configured timeout the session is
    /// moved to `TimedOut` and any later response for it is dropped.
    pub async fn perform_operation(
        &self,
        eid: u8,
        request: OperationRequest,
    ) -> Result<OperationResult, EngineError> {
        let (started, mut started_rx) = oneshot::channel();
        let (done, done_rx) = oneshot::channel();
        self.send(ManagerEvent::PerformOperation {
            eid,
            request,
            started,
            done,
        })
        .await?;

        match tokio::time::timeout(self.operation_timeout, done_rx).await {
            Ok(result) => result.map_err(|_| EngineError::ShuttingDown)?,
            Err(_) => {
                if let Ok(session) = started_rx.try_recv() {
                    tracing::warn!("EID {}: operation session {} timed out", eid, session);
                    // The manager may already be gone; the timeout stands either way.
                    let _ = self.send(ManagerEvent::Expire { eid, session }).await;
                }
                Err(EngineError::TimedOut)
            }
        }
    }

    pub async fn device_schema_info(&self, eid: u8) -> Result<Vec<SchemaInfo>, EngineError> {
        self.call(|reply| ManagerEvent::SchemaInfo { eid, reply }).await
    }

    pub async fn supported_operations(&self, eid: u8) -> Result<Vec<OperationType>, EngineError> {
        self.call(|reply| ManagerEvent::SupportedOperations { eid, reply })
            .await
    }

    pub async fn device_state(&self, eid: u8) -> Result<DeviceState, EngineError> {
        self.call(|reply| ManagerEvent::DeviceState { eid, reply })
            .await
    }

    pub async fn remove_endpoint(&self, eid: u8) -> Result<(), EngineError> {
        self.send(ManagerEvent::RemoveEndpoint { eid }).await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(ManagerEvent::Shutdown).await
    }
}

/// Owner of all RDE devices.
pub struct Manager {
    shared: Shared,
    devices: HashMap<u8, Device>,
    /// Callers waiting for an operation result.
    waiters: HashMap<(u8, SessionId), Reply<OperationResult>>,
    rx: mpsc::Receiver<ManagerEvent>,
}

impl Manager {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn BejCodec>,
    ) -> (Self, ManagerHandle) {
        let (tx, rx) = mpsc::channel(config.operation.queue_depth);
        let handle = ManagerHandle {
            tx,
            operation_timeout: config.operation.timeout(),
        };
        let manager = Self {
            shared: Shared {
                config: Arc::new(config),
                instance_ids: Arc::new(InstanceIdDb::new()),
                transport,
                codec,
            },
            devices: HashMap::new(),
            waiters: HashMap::new(),
            rx,
        };
        (manager, handle)
    }

    /// Spawns the event loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Processes events until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("RDE manager started");
        while let Some(event) = self.rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        for (eid, mut device) in std::mem::take(&mut self.devices) {
            let completions = device.disable();
            self.deliver(eid, completions);
            self.shared.instance_ids.release_endpoint(eid);
        }
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(EngineError::ShuttingDown));
        }
        tracing::info!("RDE manager stopped");
    }

    /// Returns false once the loop should stop.
    fn handle_event(&mut self, event: ManagerEvent) -> bool {
        match event {
            ManagerEvent::EndpointDiscovered {
                eid,
                uuid,
                tid,
                pdr_payloads,
            } => self.endpoint_discovered(eid, uuid, tid, pdr_payloads),
            ManagerEvent::Response {
                eid,
                instance_id,
                message,
            } => match self.devices.get_mut(&eid) {
                Some(device) => {
                    let completions = device.handle_response(instance_id, message.as_deref());
                    self.deliver(eid, completions);
                }
                None => tracing::warn!(
                    "Response from unknown EID {} (iid {}) dropped",
                    eid,
                    instance_id
                ),
            },
            ManagerEvent::PerformOperation {
                eid,
                request,
                started,
                done,
            } => {
                let Some(device) = self.devices.get_mut(&eid) else {
                    let _ = done.send(Err(EngineError::DeviceNotFound(eid)));
                    return true;
                };
                match device.start_operation(request) {
                    Ok(session) => {
                        let _ = started.send(session);
                        self.waiters.insert((eid, session), done);
                    }
                    Err(e) => {
                        tracing::warn!("EID {}: operation rejected: {}", eid, e);
                        let _ = done.send(Err(e));
                    }
                }
            }
            ManagerEvent::Expire { eid, session } => {
                self.waiters.remove(&(eid, session));
                if let Some(device) = self.devices.get_mut(&eid) {
                    device.expire(session);
                }
            }
            ManagerEvent::SchemaInfo { eid, reply } => {
                let _ = reply.send(self.device(eid).map(Device::schema_info));
            }
            ManagerEvent::SupportedOperations { eid, reply } => {
                let _ = reply.send(self.device(eid).map(Device::supported_operations));
            }
            ManagerEvent::DeviceState { eid, reply } => {
                let _ = reply.send(self.device(eid).map(Device::state));
            }
            ManagerEvent::RemoveEndpoint { eid } => {
                if let Some(mut device) = self.devices.remove(&eid) {
                    tracing::info!("Removing RDE device: EID={}", eid);
                    let completions = device.disable();
                    self.deliver(eid, completions);
                    self.shared.instance_ids.release_endpoint(eid);
                }
            }
            ManagerEvent::Shutdown => {
                tracing::info!("RDE manager shutting down");
                return false;
            }
        }
        true
    }

    fn device(&self, eid: u8) -> Result<&Device, EngineError> {
        self.devices.get(&eid).ok_or(EngineError::DeviceNotFound(eid))
    }

    fn endpoint_discovered(&mut self, eid: u8, uuid: Uuid, tid: u8, pdr_payloads: Vec<Vec<u8>>) {
        let refreshed = match self.devices.get_mut(&eid) {
            Some(device) if device.uuid() == uuid => {
                device.set_pdr_payloads(pdr_payloads.clone());
                Some(device.refresh())
            }
            _ => None,
        };
        let completions = match refreshed {
            Some(completions) => completions,
            None => {
                let mut completions = Vec::new();
                if let Some(mut previous) = self.devices.remove(&eid) {
                    tracing::info!(
                        "EID {} now reports UUID {} (was {})",
                        eid,
                        uuid,
                        previous.uuid()
                    );
                    completions = previous.disable();
                }
                let mut device = Device::new(eid, tid, uuid, pdr_payloads, self.shared.clone());
                completions.extend(device.refresh());
                self.devices.insert(eid, device);
                completions
            }
        };
        self.deliver(eid, completions);
    }

    fn deliver(&mut self, eid: u8, completions: Vec<OperationCompletion>) {
        for completion in completions {
            match self.waiters.remove(&(eid, completion.session)) {
                Some(waiter) => {
                    let _ = waiter.send(completion.result);
                }
                None => tracing::debug!(
                    "EID {}: no caller waiting for session {}",
                    eid,
                    completion.session
                ),
            }
        }
    }
}
