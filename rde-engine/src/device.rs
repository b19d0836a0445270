//! Device aggregate - owns one endpoint's registry, metadata, dictionaries
//! and sessions, and correlates responses with the requests that caused them.

use crate::config::Config;
use crate::dictionary::DictionarySession;
use crate::discovery::DiscoverySession;
use crate::error::EngineError;
use crate::operation::{OperationRequest, OperationResult, OperationSession};
use crate::session::{Outgoing, Session, SessionContext, SessionId, SessionOutput, Step};
use crate::state::{DeviceState, OpState};
use crate::transport::{InstanceIdDb, Transport};
use rde_core::{BejCodec, Metadata, ResourceRegistry, SchemaInfo};
use rde_protocol::{encode_request, schema_class, split_response, OperationType, RdeCommand};
use rde_storage::{DictionaryKey, DictionaryStore};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Collaborators shared by every device of a manager.
#[derive(Clone)]
pub struct Shared {
    pub config: Arc<Config>,
    pub instance_ids: Arc<InstanceIdDb>,
    pub transport: Arc<dyn Transport>,
    pub codec: Arc<dyn BejCodec>,
}

/// Final outcome of an operation session.
#[derive(Debug)]
pub struct OperationCompletion {
    pub session: SessionId,
    pub result: Result<OperationResult, EngineError>,
}

/// A request waiting for its response.
#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    session: SessionId,
    /// Device generation at dispatch; a refresh makes older entries stale.
    generation: u64,
    command: RdeCommand,
}

/// One RDE endpoint.
pub struct Device {
    eid: u8,
    tid: u8,
    uuid: Uuid,
    state: DeviceState,
    metadata: Metadata,
    registry: ResourceRegistry,
    store: DictionaryStore,
    /// Raw Redfish Resource PDR records the registry is rebuilt from.
    pdr_payloads: Vec<Vec<u8>>,
    shared: Shared,

    sessions: HashMap<SessionId, Session>,
    /// Outstanding requests indexed by instance id.
    pending: HashMap<u8, PendingRequest>,
    /// Requests held back by the concurrency bound.
    waiting: VecDeque<(SessionId, Outgoing)>,
    /// Dictionaries still to download, fetched one at a time.
    dictionary_queue: VecDeque<DictionaryKey>,

    generation: u64,
    next_session: u64,
    next_operation_id: u16,
}

impl Device {
    pub fn new(eid: u8, tid: u8, uuid: Uuid, pdr_payloads: Vec<Vec<u8>>, shared: Shared) -> Self {
        tracing::info!(
            "Creating RDE device: EID={}, TID={}, UUID={}, {} PDRs",
            eid,
            tid,
            uuid,
            pdr_payloads.len()
        );
        let config = &shared.config;
        Self {
            eid,
            tid,
            uuid,
            state: DeviceState::NotReady,
            metadata: config.negotiation.metadata(),
            registry: ResourceRegistry::new(),
            store: DictionaryStore::new(&config.storage.dictionary_dir, uuid),
            pdr_payloads,
            sessions: HashMap::new(),
            pending: HashMap::new(),
            waiting: VecDeque::new(),
            dictionary_queue: VecDeque::new(),
            generation: 0,
            next_session: 1,
            next_operation_id: 1,
            shared,
        }
    }

    pub fn eid(&self) -> u8 {
        self.eid
    }

    pub fn tid(&self) -> u8 {
        self.tid
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn store(&self) -> &DictionaryStore {
        &self.store
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Number of requests held back by the concurrency bound.
    pub fn queued(&self) -> usize {
        self.waiting.len()
    }

    pub fn session_state(&self, id: SessionId) -> Option<OpState> {
        self.sessions.get(&id).map(Session::state)
    }

    /// Replaces the PDR records used by the next refresh.
    pub fn set_pdr_payloads(&mut self, pdr_payloads: Vec<Vec<u8>>) {
        self.pdr_payloads = pdr_payloads;
    }

    /// Rebuilds the device model and restarts discovery.
    ///
    /// Every running session is cancelled first; cancelled operations are
    /// returned so their callers can be answered.
    pub fn refresh(&mut self) -> Vec<OperationCompletion> {
        tracing::info!("Refreshing RDE device: EID={}", self.eid);
        let completions = self.cancel_all(OpState::Cancelled);
        self.metadata.clear_negotiated();

        if let Err(e) = self
            .registry
            .load_from_resource_pdr(&self.pdr_payloads, &[])
        {
            tracing::error!("EID {}: failed to build resource registry: {}", self.eid, e);
            self.state = DeviceState::NotReady;
            return completions;
        }
        tracing::info!(
            "EID {}: resource registry has {} entries",
            self.eid,
            self.registry.len()
        );

        let config = Arc::clone(&self.shared.config);
        match &config.storage.annotation_dictionary {
            Some(path) => match self.store.load_annotation(path) {
                Ok(()) => tracing::info!(
                    "EID {}: annotation dictionary loaded from {}",
                    self.eid,
                    path.display()
                ),
                Err(e) => tracing::warn!(
                    "EID {}: annotation dictionary {} not loaded: {}",
                    self.eid,
                    path.display(),
                    e
                ),
            },
            None => tracing::info!("EID {}: no annotation dictionary configured", self.eid),
        }

        match self.store.load_persisted() {
            Ok(0) => {}
            Ok(n) => tracing::info!("EID {}: reloaded {} persisted dictionaries", self.eid, n),
            Err(e) => tracing::warn!("EID {}: failed to reload dictionaries: {}", self.eid, e),
        }

        if config.storage.dump_registry {
            let path = self.store.dir().join("registry.json");
            if let Err(e) = self.registry.save(&path) {
                tracing::warn!(
                    "EID {}: failed to dump registry to {}: {}",
                    self.eid,
                    path.display(),
                    e
                );
            }
        }

        tracing::info!("EID {}: discovery is in progress", self.eid);
        self.state = DeviceState::Discovering;
        if let Err(e) = self.start_session(Session::Discovery(DiscoverySession::new())) {
            tracing::error!("EID {}: failed to start discovery: {}", self.eid, e);
            self.state = DeviceState::NotReady;
        }
        completions
    }

    /// Takes the device out of service. Running sessions are cancelled.
    pub fn disable(&mut self) -> Vec<OperationCompletion> {
        tracing::info!("Disabling RDE device: EID={}", self.eid);
        let completions = self.cancel_all(OpState::Cancelled);
        self.state = DeviceState::Disabled;
        completions
    }

    /// Starts an operation and returns its session id. The result arrives
    /// later as an [`OperationCompletion`].
    pub fn start_operation(&mut self, request: OperationRequest) -> Result<SessionId, EngineError> {
        if !self.state.accepts_operations() {
            return Err(EngineError::DeviceNotReady {
                eid: self.eid,
                state: self.state,
            });
        }
        if !self.metadata.supported_operations().contains(&request.operation) {
            return Err(EngineError::UnsupportedOperation(request.operation));
        }

        let operation_id = self.allocate_operation_id();
        self.start_session(Session::Operation(OperationSession::new(
            request,
            operation_id,
        )))
    }

    /// Marks a session as timed out.
    pub fn expire(&mut self, id: SessionId) -> bool {
        self.abandon(id, OpState::TimedOut)
    }

    /// Marks a session as cancelled.
    pub fn cancel(&mut self, id: SessionId) -> bool {
        self.abandon(id, OpState::Cancelled)
    }

    pub fn schema_info(&self) -> Vec<SchemaInfo> {
        self.registry.schema_info()
    }

    /// Operations both sides support; empty before negotiation.
    pub fn supported_operations(&self) -> Vec<OperationType> {
        self.metadata.supported_operations()
    }

    /// Feeds the response (or the transport's failure sentinel) for
    /// `instance_id`.
    pub fn handle_response(
        &mut self,
        instance_id: u8,
        message: Option<&[u8]>,
    ) -> Vec<OperationCompletion> {
        let mut completions = Vec::new();

        let Some(pending) = self.pending.remove(&instance_id) else {
            tracing::warn!(
                "EID {}: response for unknown instance id {} dropped",
                self.eid,
                instance_id
            );
            return completions;
        };
        self.shared.instance_ids.free(self.eid, instance_id);

        if pending.generation != self.generation {
            tracing::info!(
                "EID {}: stale response for instance id {} ignored (session {} predates refresh)",
                self.eid,
                instance_id,
                pending.session
            );
        } else if let Some(mut session) = self.sessions.remove(&pending.session) {
            if session.state().is_abandoned() {
                tracing::info!(
                    "EID {}: late response for {} session {} ignored ({})",
                    self.eid,
                    session.kind(),
                    pending.session,
                    session.state()
                );
            } else {
                let result = self.response_body(instance_id, pending.command, message).and_then(
                    |body| {
                        let mut ctx = self.context();
                        session.on_response(&mut ctx, body)
                    },
                );
                self.advance(pending.session, session, result, &mut completions);
            }
        } else {
            tracing::info!(
                "EID {}: response for finished session {} ignored",
                self.eid,
                pending.session
            );
        }

        self.pump(&mut completions);
        completions
    }

    fn response_body<'m>(
        &self,
        instance_id: u8,
        command: RdeCommand,
        message: Option<&'m [u8]>,
    ) -> Result<&'m [u8], EngineError> {
        let message = match message {
            Some(message) if !message.is_empty() => message,
            _ => return Err(EngineError::NoResponse(self.eid)),
        };
        tracing::debug!(
            "Rx EID {} iid {}: {}",
            self.eid,
            instance_id,
            hex::encode(message)
        );
        Ok(split_response(message, instance_id, command)?)
    }

    fn context(&mut self) -> SessionContext<'_> {
        SessionContext {
            eid: self.eid,
            metadata: &mut self.metadata,
            store: &mut self.store,
            registry: &self.registry,
            codec: self.shared.codec.as_ref(),
            transfer: &self.shared.config.transfer,
        }
    }

    fn allocate_session_id(&mut self) -> SessionId {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        id
    }

    fn allocate_operation_id(&mut self) -> u16 {
        let id = self.next_operation_id;
        self.next_operation_id = self.next_operation_id.wrapping_add(1).max(1);
        id
    }

    /// Runs the first step of a new session. On error nothing stays behind.
    fn start_session(&mut self, mut session: Session) -> Result<SessionId, EngineError> {
        let id = self.allocate_session_id();
        let step = {
            let mut ctx = self.context();
            session.start(&mut ctx)?
        };

        match step {
            Step::Send(out) => {
                tracing::debug!(
                    "EID {}: started {} session {}",
                    self.eid,
                    session.kind(),
                    id
                );
                self.sessions.insert(id, session);
                if let Err(e) = self.dispatch(id, out) {
                    self.sessions.remove(&id);
                    return Err(e);
                }
                Ok(id)
            }
            Step::Done(_) | Step::Discarded => Err(EngineError::SessionAborted(session.state())),
        }
    }

    /// Applies the outcome of one session step.
    fn advance(
        &mut self,
        id: SessionId,
        mut session: Session,
        result: Result<Step, EngineError>,
        completions: &mut Vec<OperationCompletion>,
    ) {
        match result {
            Ok(Step::Send(out)) => {
                self.sessions.insert(id, session);
                if let Err(e) = self.dispatch(id, out) {
                    if let Some(session) = self.sessions.remove(&id) {
                        self.fail(id, session, e, completions);
                    }
                }
            }
            Ok(Step::Done(output)) => self.finish(id, output, completions),
            Ok(Step::Discarded) => {}
            Err(e) => {
                session.set_state(OpState::OperationFailed);
                self.fail(id, session, e, completions);
            }
        }
    }

    fn finish(
        &mut self,
        id: SessionId,
        output: SessionOutput,
        completions: &mut Vec<OperationCompletion>,
    ) {
        match output {
            SessionOutput::Negotiated => {
                let operations = self.metadata.supported_operations();
                self.registry.set_operations(&operations);
                tracing::info!(
                    "EID {}: discovery complete, supported operations {:?}",
                    self.eid,
                    operations
                );
                self.state = DeviceState::Ready;
                if self.shared.config.negotiation.fetch_dictionaries {
                    self.queue_dictionaries();
                }
                self.next_dictionary(completions);
            }
            SessionOutput::Dictionary(key) => {
                tracing::info!("EID {}: dictionary {} downloaded", self.eid, key);
                self.next_dictionary(completions);
            }
            SessionOutput::Operation(result) => {
                tracing::info!("EID {}: operation session {} complete", self.eid, id);
                completions.push(OperationCompletion {
                    session: id,
                    result: Ok(result),
                });
            }
        }
    }

    fn fail(
        &mut self,
        id: SessionId,
        session: Session,
        error: EngineError,
        completions: &mut Vec<OperationCompletion>,
    ) {
        match session {
            Session::Discovery(_) => {
                tracing::error!("EID {}: discovery failed: {}", self.eid, error);
                self.state = match error {
                    EngineError::NoResponse(_) => DeviceState::Unreachable,
                    _ => DeviceState::NotReady,
                };
            }
            Session::Dictionary(dictionary) => {
                tracing::warn!(
                    "EID {}: dictionary {} download failed: {}",
                    self.eid,
                    dictionary.key(),
                    error
                );
                self.next_dictionary(completions);
            }
            Session::Operation(_) => {
                tracing::warn!(
                    "EID {}: operation session {} failed: {}",
                    self.eid,
                    id,
                    error
                );
                completions.push(OperationCompletion {
                    session: id,
                    result: Err(error),
                });
            }
        }
    }

    fn queue_dictionaries(&mut self) {
        let mut keys: Vec<DictionaryKey> = self
            .registry
            .entries()
            .filter(|info| info.schema_class == schema_class::MAJOR)
            .map(|info| DictionaryKey::new(info.resource_id, info.schema_class))
            .filter(|key| !self.store.contains_complete(key.resource_id, key.schema_class))
            .collect();
        keys.sort();
        tracing::info!(
            "EID {}: {} schema dictionaries to fetch",
            self.eid,
            keys.len()
        );
        self.dictionary_queue.extend(keys);
    }

    /// Starts the next queued dictionary download, or returns to Ready once
    /// the queue is empty.
    fn next_dictionary(&mut self, completions: &mut Vec<OperationCompletion>) {
        if !matches!(self.state, DeviceState::Ready | DeviceState::Busy) {
            return;
        }
        while let Some(key) = self.dictionary_queue.pop_front() {
            if self.store.contains_complete(key.resource_id, key.schema_class) {
                continue;
            }
            let session = DictionarySession::new(key.resource_id, key.schema_class);
            match self.start_session(Session::Dictionary(session)) {
                Ok(_) => {
                    self.state = DeviceState::Busy;
                    return;
                }
                Err(e) => {
                    tracing::warn!("EID {}: cannot fetch dictionary {}: {}", self.eid, key, e)
                }
            }
        }
        if self.state == DeviceState::Busy {
            tracing::info!("EID {}: schema dictionaries ready", self.eid);
        }
        self.state = DeviceState::Ready;
        self.pump(completions);
    }

    /// Sends `out` now, or queues it while the device is at its concurrency
    /// bound.
    fn dispatch(&mut self, session: SessionId, out: Outgoing) -> Result<(), EngineError> {
        if !self.has_capacity() {
            tracing::debug!(
                "EID {}: {} queued behind {} in-flight requests",
                self.eid,
                out.command,
                self.pending.len()
            );
            self.waiting.push_back((session, out));
            return Ok(());
        }
        self.send_now(session, out)
    }

    /// Stale requests from before a refresh are still on the wire and count
    /// against the bound until their response or failure arrives.
    fn has_capacity(&self) -> bool {
        self.pending.len() < self.metadata.effective_concurrency() as usize
    }

    fn send_now(&mut self, session: SessionId, out: Outgoing) -> Result<(), EngineError> {
        let eid = self.eid;
        let instance_id = self.shared.instance_ids.allocate(eid)?;

        let message = match encode_request(instance_id, out.command, &out.body) {
            Ok(message) => message,
            Err(e) => {
                self.shared.instance_ids.free(eid, instance_id);
                return Err(e.into());
            }
        };
        tracing::debug!(
            "Tx EID {} iid {}: {}",
            eid,
            instance_id,
            hex::encode(&message)
        );

        if let Err(e) = self.shared.transport.send(eid, instance_id, message) {
            tracing::error!(
                "EID {}: failed to send {} (iid {}): {}",
                eid,
                out.command,
                instance_id,
                e
            );
            self.shared.instance_ids.free(eid, instance_id);
            return Err(e);
        }

        self.pending.insert(
            instance_id,
            PendingRequest {
                session,
                generation: self.generation,
                command: out.command,
            },
        );
        Ok(())
    }

    /// Sends queued requests while the concurrency bound allows.
    fn pump(&mut self, completions: &mut Vec<OperationCompletion>) {
        while self.has_capacity() {
            let Some((id, out)) = self.waiting.pop_front() else {
                break;
            };
            if !self.sessions.get(&id).is_some_and(|s| !s.state().is_terminal()) {
                continue;
            }
            if let Err(e) = self.send_now(id, out) {
                if let Some(mut session) = self.sessions.remove(&id) {
                    session.set_state(OpState::OperationFailed);
                    self.fail(id, session, e, completions);
                }
            }
        }
    }

    fn abandon(&mut self, id: SessionId, state: OpState) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if session.state().is_terminal() {
            return false;
        }
        tracing::info!(
            "EID {}: {} session {} moved to {}",
            self.eid,
            session.kind(),
            id,
            state
        );
        session.set_state(state);

        self.waiting.retain(|(queued, _)| *queued != id);
        // Keep the slot until the outstanding response frees its instance id.
        if !self.pending.values().any(|p| p.session == id) {
            self.sessions.remove(&id);
        }
        true
    }

    fn cancel_all(&mut self, state: OpState) -> Vec<OperationCompletion> {
        let mut completions = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            if session.state().is_terminal() {
                continue;
            }
            session.set_state(state);
            if let Session::Operation(_) = session {
                completions.push(OperationCompletion {
                    session: *id,
                    result: Err(EngineError::SessionAborted(state)),
                });
            }
        }
        // Pending entries stay so their instance ids are freed on arrival;
        // the generation bump makes them stale.
        self.sessions.clear();
        self.waiting.clear();
        self.dictionary_queue.clear();
        self.generation += 1;
        completions
    }
}
