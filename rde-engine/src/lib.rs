//! # rde-engine
//!
//! Session and transfer engine for the RDE management controller.
//!
//! This crate provides:
//! - Per-device discovery, dictionary download and operation sessions
//! - Multipart send and receive state machines
//! - Instance id allocation and stale response filtering
//! - A single-task manager with an async handle for callers
//! - YAML and environment based configuration

pub mod config;
pub mod device;
pub mod dictionary;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod operation;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod state;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{
    Config, ConfigError, NegotiationConfig, OperationConfig, StorageConfig, TransferConfig,
};
pub use device::{Device, OperationCompletion, Shared};
pub use error::{EngineError, ErrorKind};
pub use manager::{Manager, ManagerEvent, ManagerHandle};
pub use operation::{OperationRequest, OperationResult, STATUS_OK};
pub use session::SessionId;
pub use state::{DeviceState, OpState};
pub use transport::{InstanceIdDb, Transport};
