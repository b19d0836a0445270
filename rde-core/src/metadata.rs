//! Negotiated device parameters.
//!
//! Local (management controller) parameters always have a value; device
//! parameters stay unset until the corresponding negotiation response has
//! been decoded. Reading an unset device parameter is a precondition failure.

use crate::error::CoreError;
use rde_protocol::{DeviceCapabilities, FeatureSupport, OperationType};
use std::fmt;

/// Default MC feature support: Head, Read and Update.
pub const DEFAULT_MC_FEATURES: u16 =
    FeatureSupport::HEAD | FeatureSupport::READ | FeatureSupport::UPDATE;

/// Default MC concurrency support.
pub const DEFAULT_MC_CONCURRENCY: u8 = 1;

/// Default largest chunk the MC accepts in one multipart receive.
pub const DEFAULT_MC_MAX_CHUNK_SIZE: u32 = 1024;

pub const DEFAULT_PROTOCOL_VERSION: &str = "1.0";
pub const DEFAULT_ENCODING: &str = "application/json";

/// Names of the metadata fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    McConcurrencySupport,
    McFeatureSupport,
    McMaxTransferChunkSize,
    DeviceConcurrencySupport,
    DeviceCapabilities,
    DeviceFeatureSupport,
    DeviceConfigurationSignature,
    DeviceProviderName,
    DeviceMaxTransferChunkSize,
    ProtocolVersion,
    Encoding,
    Etag,
    SessionId,
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetadataKey::McConcurrencySupport => "mc_concurrency_support",
            MetadataKey::McFeatureSupport => "mc_feature_support",
            MetadataKey::McMaxTransferChunkSize => "mc_max_transfer_chunk_size",
            MetadataKey::DeviceConcurrencySupport => "device_concurrency_support",
            MetadataKey::DeviceCapabilities => "device_capabilities",
            MetadataKey::DeviceFeatureSupport => "device_feature_support",
            MetadataKey::DeviceConfigurationSignature => "device_configuration_signature",
            MetadataKey::DeviceProviderName => "device_provider_name",
            MetadataKey::DeviceMaxTransferChunkSize => "device_max_transfer_chunk_size",
            MetadataKey::ProtocolVersion => "protocol_version",
            MetadataKey::Encoding => "encoding",
            MetadataKey::Etag => "etag",
            MetadataKey::SessionId => "session_id",
        };
        write!(f, "{}", name)
    }
}

/// A value for one metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataField {
    McConcurrencySupport(u8),
    McFeatureSupport(FeatureSupport),
    McMaxTransferChunkSize(u32),
    DeviceConcurrencySupport(u8),
    DeviceCapabilities(DeviceCapabilities),
    DeviceFeatureSupport(FeatureSupport),
    DeviceConfigurationSignature(u32),
    DeviceProviderName(String),
    DeviceMaxTransferChunkSize(u32),
    ProtocolVersion(String),
    Encoding(String),
    Etag(String),
    SessionId(String),
}

impl MetadataField {
    pub fn key(&self) -> MetadataKey {
        match self {
            MetadataField::McConcurrencySupport(_) => MetadataKey::McConcurrencySupport,
            MetadataField::McFeatureSupport(_) => MetadataKey::McFeatureSupport,
            MetadataField::McMaxTransferChunkSize(_) => MetadataKey::McMaxTransferChunkSize,
            MetadataField::DeviceConcurrencySupport(_) => MetadataKey::DeviceConcurrencySupport,
            MetadataField::DeviceCapabilities(_) => MetadataKey::DeviceCapabilities,
            MetadataField::DeviceFeatureSupport(_) => MetadataKey::DeviceFeatureSupport,
            MetadataField::DeviceConfigurationSignature(_) => {
                MetadataKey::DeviceConfigurationSignature
            }
            MetadataField::DeviceProviderName(_) => MetadataKey::DeviceProviderName,
            MetadataField::DeviceMaxTransferChunkSize(_) => {
                MetadataKey::DeviceMaxTransferChunkSize
            }
            MetadataField::ProtocolVersion(_) => MetadataKey::ProtocolVersion,
            MetadataField::Encoding(_) => MetadataKey::Encoding,
            MetadataField::Etag(_) => MetadataKey::Etag,
            MetadataField::SessionId(_) => MetadataKey::SessionId,
        }
    }
}

/// Metadata of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    mc_concurrency_support: u8,
    mc_feature_support: FeatureSupport,
    mc_max_transfer_chunk_size: u32,
    protocol_version: String,
    encoding: String,

    device_concurrency_support: Option<u8>,
    device_capabilities: Option<DeviceCapabilities>,
    device_feature_support: Option<FeatureSupport>,
    device_configuration_signature: Option<u32>,
    device_provider_name: Option<String>,
    device_max_transfer_chunk_size: Option<u32>,
    etag: Option<String>,
    session_id: Option<String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            mc_concurrency_support: DEFAULT_MC_CONCURRENCY,
            mc_feature_support: FeatureSupport::from_bits(DEFAULT_MC_FEATURES),
            mc_max_transfer_chunk_size: DEFAULT_MC_MAX_CHUNK_SIZE,
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            encoding: DEFAULT_ENCODING.to_string(),
            device_concurrency_support: None,
            device_capabilities: None,
            device_feature_support: None,
            device_configuration_signature: None,
            device_provider_name: None,
            device_max_transfer_chunk_size: None,
            etag: None,
            session_id: None,
        }
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one field.
    pub fn set(&mut self, field: MetadataField) {
        match field {
            MetadataField::McConcurrencySupport(v) => self.mc_concurrency_support = v,
            MetadataField::McFeatureSupport(v) => self.mc_feature_support = v,
            MetadataField::McMaxTransferChunkSize(v) => self.mc_max_transfer_chunk_size = v,
            MetadataField::DeviceConcurrencySupport(v) => {
                self.device_concurrency_support = Some(v)
            }
            MetadataField::DeviceCapabilities(v) => self.device_capabilities = Some(v),
            MetadataField::DeviceFeatureSupport(v) => self.device_feature_support = Some(v),
            MetadataField::DeviceConfigurationSignature(v) => {
                self.device_configuration_signature = Some(v)
            }
            MetadataField::DeviceProviderName(v) => self.device_provider_name = Some(v),
            MetadataField::DeviceMaxTransferChunkSize(v) => {
                self.device_max_transfer_chunk_size = Some(v)
            }
            MetadataField::ProtocolVersion(v) => self.protocol_version = v,
            MetadataField::Encoding(v) => self.encoding = v,
            MetadataField::Etag(v) => self.etag = Some(v),
            MetadataField::SessionId(v) => self.session_id = Some(v),
        }
    }

    /// Returns the current value of a field, if set.
    pub fn get(&self, key: MetadataKey) -> Option<MetadataField> {
        match key {
            MetadataKey::McConcurrencySupport => {
                Some(MetadataField::McConcurrencySupport(self.mc_concurrency_support))
            }
            MetadataKey::McFeatureSupport => {
                Some(MetadataField::McFeatureSupport(self.mc_feature_support))
            }
            MetadataKey::McMaxTransferChunkSize => Some(MetadataField::McMaxTransferChunkSize(
                self.mc_max_transfer_chunk_size,
            )),
            MetadataKey::DeviceConcurrencySupport => self
                .device_concurrency_support
                .map(MetadataField::DeviceConcurrencySupport),
            MetadataKey::DeviceCapabilities => self
                .device_capabilities
                .map(MetadataField::DeviceCapabilities),
            MetadataKey::DeviceFeatureSupport => self
                .device_feature_support
                .map(MetadataField::DeviceFeatureSupport),
            MetadataKey::DeviceConfigurationSignature => self
                .device_configuration_signature
                .map(MetadataField::DeviceConfigurationSignature),
            MetadataKey::DeviceProviderName => self
                .device_provider_name
                .clone()
                .map(MetadataField::DeviceProviderName),
            MetadataKey::DeviceMaxTransferChunkSize => self
                .device_max_transfer_chunk_size
                .map(MetadataField::DeviceMaxTransferChunkSize),
            MetadataKey::ProtocolVersion => {
                Some(MetadataField::ProtocolVersion(self.protocol_version.clone()))
            }
            MetadataKey::Encoding => Some(MetadataField::Encoding(self.encoding.clone())),
            MetadataKey::Etag => self.etag.clone().map(MetadataField::Etag),
            MetadataKey::SessionId => self.session_id.clone().map(MetadataField::SessionId),
        }
    }

    /// Forgets everything learned from the device.
    pub fn clear_negotiated(&mut self) {
        self.device_concurrency_support = None;
        self.device_capabilities = None;
        self.device_feature_support = None;
        self.device_configuration_signature = None;
        self.device_provider_name = None;
        self.device_max_transfer_chunk_size = None;
        self.etag = None;
    }

    pub fn mc_concurrency_support(&self) -> u8 {
        self.mc_concurrency_support
    }

    pub fn mc_feature_support(&self) -> FeatureSupport {
        self.mc_feature_support
    }

    pub fn mc_max_transfer_chunk_size(&self) -> u32 {
        self.mc_max_transfer_chunk_size
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn device_concurrency_support(&self) -> Result<u8, CoreError> {
        self.device_concurrency_support
            .ok_or(CoreError::MissingMetadata(MetadataKey::DeviceConcurrencySupport))
    }

    pub fn device_capabilities(&self) -> Result<DeviceCapabilities, CoreError> {
        self.device_capabilities
            .ok_or(CoreError::MissingMetadata(MetadataKey::DeviceCapabilities))
    }

    pub fn device_feature_support(&self) -> Result<FeatureSupport, CoreError> {
        self.device_feature_support
            .ok_or(CoreError::MissingMetadata(MetadataKey::DeviceFeatureSupport))
    }

    pub fn device_configuration_signature(&self) -> Result<u32, CoreError> {
        self.device_configuration_signature.ok_or(CoreError::MissingMetadata(
            MetadataKey::DeviceConfigurationSignature,
        ))
    }

    pub fn device_provider_name(&self) -> Result<&str, CoreError> {
        self.device_provider_name
            .as_deref()
            .ok_or(CoreError::MissingMetadata(MetadataKey::DeviceProviderName))
    }

    pub fn device_max_transfer_chunk_size(&self) -> Result<u32, CoreError> {
        self.device_max_transfer_chunk_size.ok_or(CoreError::MissingMetadata(
            MetadataKey::DeviceMaxTransferChunkSize,
        ))
    }

    /// Requests the device may have outstanding at once; 1 until negotiated.
    pub fn effective_concurrency(&self) -> u8 {
        self.device_concurrency_support
            .map(|device| device.min(self.mc_concurrency_support).max(1))
            .unwrap_or(1)
    }

    /// Operations both sides support; empty until negotiated.
    pub fn supported_operations(&self) -> Vec<OperationType> {
        match self.device_feature_support {
            Some(device) => FeatureSupport::from_bits(device.bits() & self.mc_feature_support.bits())
                .operations(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let meta = Metadata::default();
        assert_eq!(meta.mc_concurrency_support(), 1);
        assert_eq!(meta.mc_feature_support().bits(), 0x0013);
        assert_eq!(meta.mc_max_transfer_chunk_size(), 1024);
        assert_eq!(meta.protocol_version(), "1.0");
        assert_eq!(meta.encoding(), "application/json");
        assert!(meta.etag().is_none());
    }

    #[test]
    fn test_unset_device_field_is_precondition_failure() {
        let meta = Metadata::default();
        let err = meta.device_max_transfer_chunk_size().unwrap_err();
        assert!(matches!(
            err,
            CoreError::MissingMetadata(MetadataKey::DeviceMaxTransferChunkSize)
        ));
        assert!(err.to_string().contains("device_max_transfer_chunk_size"));
        assert!(meta.get(MetadataKey::DeviceProviderName).is_none());
    }

    #[test]
    fn test_set_and_get_by_field() {
        let mut meta = Metadata::default();
        meta.set(MetadataField::DeviceConcurrencySupport(1));
        meta.set(MetadataField::DeviceConfigurationSignature(0xDEAD_BEEF));
        meta.set(MetadataField::DeviceProviderName("Acme".to_string()));
        meta.set(MetadataField::McConcurrencySupport(2));

        assert_eq!(meta.device_concurrency_support().unwrap(), 1);
        assert_eq!(meta.device_configuration_signature().unwrap(), 0xDEAD_BEEF);
        assert_eq!(meta.device_provider_name().unwrap(), "Acme");
        assert_eq!(
            meta.get(MetadataKey::McConcurrencySupport),
            Some(MetadataField::McConcurrencySupport(2))
        );

        let field = MetadataField::Etag("W/\"1\"".to_string());
        assert_eq!(field.key(), MetadataKey::Etag);
        meta.set(field.clone());
        assert_eq!(meta.get(MetadataKey::Etag), Some(field));
    }

    #[test]
    fn test_clear_negotiated_keeps_local_fields() {
        let mut meta = Metadata::default();
        meta.set(MetadataField::McFeatureSupport(FeatureSupport::from_bits(0x0001)));
        meta.set(MetadataField::DeviceFeatureSupport(FeatureSupport::from_bits(0x0003)));
        meta.clear_negotiated();

        assert!(meta.device_feature_support().is_err());
        assert_eq!(meta.mc_feature_support().bits(), 0x0001);
    }

    #[test]
    fn test_effective_concurrency_and_operations() {
        let mut meta = Metadata::default();
        assert_eq!(meta.effective_concurrency(), 1);
        assert!(meta.supported_operations().is_empty());

        meta.set(MetadataField::McConcurrencySupport(4));
        meta.set(MetadataField::DeviceConcurrencySupport(2));
        assert_eq!(meta.effective_concurrency(), 2);

        meta.set(MetadataField::DeviceConcurrencySupport(0));
        assert_eq!(meta.effective_concurrency(), 1);

        meta.set(MetadataField::DeviceFeatureSupport(FeatureSupport::from_bits(
            FeatureSupport::READ | FeatureSupport::DELETE,
        )));
        assert_eq!(meta.supported_operations(), vec![OperationType::Read]);
    }
}
