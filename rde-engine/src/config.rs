//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RDE_CONFIG)
//! 3. Environment variables

use rde_core::metadata::{
    DEFAULT_MC_CONCURRENCY, DEFAULT_MC_FEATURES, DEFAULT_MC_MAX_CHUNK_SIZE,
};
use rde_core::{Metadata, MetadataField};
use rde_protocol::{FeatureSupport, MAX_RECEIVE_BUFFER, MIN_TRANSFER_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dictionary persistence.
    pub storage: StorageConfig,
    /// Values offered during parameter negotiation.
    pub negotiation: NegotiationConfig,
    /// Multipart transfer limits.
    pub transfer: TransferConfig,
    /// Operation handling.
    pub operation: OperationConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RDE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.storage.apply_env_overrides();
        self.negotiation.apply_env_overrides();
        self.transfer.apply_env_overrides();
        self.operation.apply_env_overrides();
    }

    /// Checks values that would make negotiation or transfers impossible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.negotiation.validate()?;

        if (self.transfer.max_receive_buffer as u64)
            < u64::from(self.negotiation.mc_max_transfer_chunk_size)
        {
            return Err(ConfigError::ValidationError(format!(
                "max_receive_buffer ({}) is smaller than mc_max_transfer_chunk_size ({})",
                self.transfer.max_receive_buffer, self.negotiation.mc_max_transfer_chunk_size
            )));
        }
        if self.operation.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "operation timeout must be non-zero".to_string(),
            ));
        }
        if self.operation.queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "operation queue_depth must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Dictionary persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each device gets a `<uuid>` subdirectory.
    pub dictionary_dir: PathBuf,
    /// Raw annotation dictionary loaded at device refresh.
    pub annotation_dictionary: Option<PathBuf>,
    /// Write `registry.json` next to the dictionaries after each rebuild.
    pub dump_registry: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dictionary_dir: PathBuf::from("./rde"),
            annotation_dictionary: None,
            dump_registry: false,
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("RDE_DICTIONARY_DIR") {
            self.dictionary_dir = PathBuf::from(dir);
        }

        if let Ok(path) = std::env::var("RDE_ANNOTATION_DICTIONARY") {
            self.annotation_dictionary = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Ok(dump) = std::env::var("RDE_DUMP_REGISTRY") {
            self.dump_registry = dump == "1" || dump.to_lowercase() == "true";
        }
    }
}

/// Values the management controller offers during negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Concurrent operations the MC supports.
    pub mc_concurrency_support: u8,
    /// MC feature bitmask (Head, Read, Update, ...).
    pub mc_feature_support: u16,
    /// Largest chunk the MC accepts per multipart receive.
    pub mc_max_transfer_chunk_size: u32,
    /// Fetch missing schema dictionaries once the device is ready.
    pub fetch_dictionaries: bool,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            mc_concurrency_support: DEFAULT_MC_CONCURRENCY,
            mc_feature_support: DEFAULT_MC_FEATURES,
            mc_max_transfer_chunk_size: DEFAULT_MC_MAX_CHUNK_SIZE,
            fetch_dictionaries: true,
        }
    }
}

impl NegotiationConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RDE_MC_CONCURRENCY") {
            if let Ok(n) = value.parse() {
                self.mc_concurrency_support = n;
            }
        }

        if let Ok(value) = std::env::var("RDE_MC_FEATURES") {
            let parsed = match value.strip_prefix("0x") {
                Some(hex) => u16::from_str_radix(hex, 16).ok(),
                None => value.parse().ok(),
            };
            if let Some(bits) = parsed {
                self.mc_feature_support = bits;
            }
        }

        if let Ok(value) = std::env::var("RDE_MC_MAX_CHUNK") {
            if let Ok(n) = value.parse() {
                self.mc_max_transfer_chunk_size = n;
            }
        }

        if let Ok(value) = std::env::var("RDE_FETCH_DICTIONARIES") {
            self.fetch_dictionaries = value == "1" || value.to_lowercase() == "true";
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mc_concurrency_support == 0 {
            return Err(ConfigError::ValidationError(
                "mc_concurrency_support must be at least 1".to_string(),
            ));
        }
        if self.mc_max_transfer_chunk_size < MIN_TRANSFER_CHUNK_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "mc_max_transfer_chunk_size must be at least {}",
                MIN_TRANSFER_CHUNK_SIZE
            )));
        }
        let known = (FeatureSupport::BEJ_V1_1 << 1) - 1;
        if self.mc_feature_support & !known != 0 {
            return Err(ConfigError::ValidationError(format!(
                "unknown feature bits in mc_feature_support {:#06x}",
                self.mc_feature_support
            )));
        }
        Ok(())
    }

    /// Builds device metadata seeded with the MC-side values.
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.set(MetadataField::McConcurrencySupport(
            self.mc_concurrency_support,
        ));
        metadata.set(MetadataField::McFeatureSupport(FeatureSupport::from_bits(
            self.mc_feature_support,
        )));
        metadata.set(MetadataField::McMaxTransferChunkSize(
            self.mc_max_transfer_chunk_size,
        ));
        metadata
    }
}

/// Multipart transfer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Largest chunk accepted from a device in one multipart receive.
    pub max_receive_buffer: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_receive_buffer: MAX_RECEIVE_BUFFER,
        }
    }
}

impl TransferConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RDE_MAX_RECEIVE_BUFFER") {
            if let Ok(n) = value.parse() {
                self.max_receive_buffer = n;
            }
        }
    }
}

/// Operation handling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Time a caller waits for an operation result, in milliseconds.
    pub timeout_ms: u64,
    /// Capacity of the manager event queue.
    pub queue_depth: usize,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            queue_depth: 256,
        }
    }
}

impl OperationConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RDE_OPERATION_TIMEOUT_MS") {
            if let Ok(ms) = value.parse() {
                self.timeout_ms = ms;
            }
        }

        if let Ok(value) = std::env::var("RDE_QUEUE_DEPTH") {
            if let Ok(n) = value.parse() {
                self.queue_depth = n;
            }
        }
    }

    /// Returns the operation timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
