//! Session plumbing shared by the discovery, dictionary and operation
//! sessions.
//!
//! A session is a resumable state object. It never performs I/O: each step
//! returns the next request to send, or its final output, and the owning
//! [`crate::device::Device`] takes care of instance ids, dispatch and
//! response correlation.

use crate::config::TransferConfig;
use crate::dictionary::DictionarySession;
use crate::discovery::DiscoverySession;
use crate::error::EngineError;
use crate::operation::{OperationResult, OperationSession};
use crate::state::OpState;
use bytes::Bytes;
use rde_core::{BejCodec, Metadata, ResourceRegistry};
use rde_protocol::{RdeCommand, RdeRequest};
use rde_storage::{DictionaryKey, DictionaryStore};
use std::fmt;

/// Identifies a session within its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request body waiting for an instance id and a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub command: RdeCommand,
    pub body: Bytes,
}

impl Outgoing {
    pub fn request<R: RdeRequest>(request: &R) -> Result<Self, EngineError> {
        Ok(Self {
            command: R::COMMAND,
            body: request.to_body()?,
        })
    }
}

/// What a session wants next.
#[derive(Debug)]
pub enum Step {
    Send(Outgoing),
    Done(SessionOutput),
    /// The response arrived after the session was abandoned.
    Discarded,
}

/// Final output of a session.
#[derive(Debug)]
pub enum SessionOutput {
    Negotiated,
    Dictionary(DictionaryKey),
    Operation(OperationResult),
}

/// Device state a session may read or update during one step.
pub struct SessionContext<'a> {
    pub eid: u8,
    pub metadata: &'a mut Metadata,
    pub store: &'a mut DictionaryStore,
    pub registry: &'a ResourceRegistry,
    pub codec: &'a dyn BejCodec,
    pub transfer: &'a TransferConfig,
}

/// Session kinds a device can run.
#[derive(Debug)]
pub enum Session {
    Discovery(DiscoverySession),
    Dictionary(DictionarySession),
    Operation(OperationSession),
}

impl Session {
    pub fn kind(&self) -> &'static str {
        match self {
            Session::Discovery(_) => "discovery",
            Session::Dictionary(_) => "dictionary",
            Session::Operation(_) => "operation",
        }
    }

    pub fn state(&self) -> OpState {
        match self {
            Session::Discovery(s) => s.state(),
            Session::Dictionary(s) => s.state(),
            Session::Operation(s) => s.state(),
        }
    }

    pub fn set_state(&mut self, state: OpState) {
        match self {
            Session::Discovery(s) => s.set_state(state),
            Session::Dictionary(s) => s.set_state(state),
            Session::Operation(s) => s.set_state(state),
        }
    }

    pub fn start(&mut self, ctx: &mut SessionContext<'_>) -> Result<Step, EngineError> {
        match self {
            Session::Discovery(s) => s.start(ctx),
            Session::Dictionary(s) => s.start(ctx),
            Session::Operation(s) => s.start(ctx),
        }
    }

    pub fn on_response(
        &mut self,
        ctx: &mut SessionContext<'_>,
        body: &[u8],
    ) -> Result<Step, EngineError> {
        match self {
            Session::Discovery(s) => s.on_response(ctx, body),
            Session::Dictionary(s) => s.on_response(ctx, body),
            Session::Operation(s) => s.on_response(ctx, body),
        }
    }
}
