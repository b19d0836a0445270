//! Session and device lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of one discovery, dictionary or operation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpState {
    Idle,
    Waiting,
    OperationFailed,
    TimedOut,
    Cancelled,
    Completed,
}

impl OpState {
    /// Returns whether the session will take no further steps.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OpState::Idle | OpState::Waiting)
    }

    /// Returns whether the caller abandoned the session.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, OpState::TimedOut | OpState::Cancelled)
    }
}

impl fmt::Display for OpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpState::Idle => "Idle",
            OpState::Waiting => "Waiting",
            OpState::OperationFailed => "OperationFailed",
            OpState::TimedOut => "TimedOut",
            OpState::Cancelled => "Cancelled",
            OpState::Completed => "Completed",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle state of a managed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    NotReady,
    Discovering,
    Ready,
    /// Ready, but schema dictionaries are still being fetched.
    Busy,
    Unreachable,
    Disabled,
}

impl DeviceState {
    pub fn accepts_operations(&self) -> bool {
        *self == DeviceState::Ready
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::NotReady => "NotReady",
            DeviceState::Discovering => "Discovering",
            DeviceState::Ready => "Ready",
            DeviceState::Busy => "Busy",
            DeviceState::Unreachable => "Unreachable",
            DeviceState::Disabled => "Disabled",
        };
        write!(f, "{}", name)
    }
}
