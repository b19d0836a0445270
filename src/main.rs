//! rde-mc - RDE management controller tooling
//!
//! Decodes Redfish Resource PDRs offline and writes the resource schema
//! export and the registry dump the engine produces for a live device.

use clap::{Parser, Subcommand};
use rde_core::ResourceRegistry;
use rde_engine::Config;
use rde_protocol::{FeatureSupport, OperationType};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rde-mc")]
#[command(about = "Redfish Device Enablement management controller tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the resource registry from PDR record bodies and export it
    Export {
        /// Files holding one raw Redfish Resource PDR body each
        #[arg(long = "pdr", required = true, num_args = 1..)]
        pdr: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

const SCHEMA_FILE: &str = "resource_schema.json";
const REGISTRY_FILE: &str = "registry.json";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            // An explicitly named config file must load.
            if std::env::var("RDE_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    let cli = Cli::parse();
    match cli.command {
        Commands::Export { pdr, out } => {
            let operations = FeatureSupport::from_bits(config.negotiation.mc_feature_support)
                .operations();
            let count = export(&pdr, &out, &operations)?;
            tracing::info!("Exported {} resources to {}", count, out.display());
        }
    }
    Ok(())
}

/// Decodes `pdr_files`, then writes the schema map and registry dump into
/// `out`. Returns the number of registry entries.
fn export(
    pdr_files: &[PathBuf],
    out: &Path,
    operations: &[OperationType],
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut payloads = Vec::with_capacity(pdr_files.len());
    for path in pdr_files {
        let payload = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        tracing::debug!("Read {} bytes of PDR from {}", payload.len(), path.display());
        payloads.push(payload);
    }

    let mut registry = ResourceRegistry::new();
    registry.load_from_resource_pdr(&payloads, operations)?;

    fs::create_dir_all(out)?;
    let schema = serde_json::to_string_pretty(&registry.schema_map())?;
    fs::write(out.join(SCHEMA_FILE), schema)?;
    registry.save(out.join(REGISTRY_FILE))?;
    Ok(registry.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rde_protocol::{RedfishResourcePdr, SchemaVersion};
    use tempfile::TempDir;

    fn write_pdr(dir: &Path, id: u32, parent: u32, proposed: &str, sub_uri: &str) -> PathBuf {
        let record = RedfishResourcePdr {
            resource_id: id,
            resource_flags: 0,
            containing_resource_id: parent,
            proposed_containing_name: proposed.to_string(),
            sub_uri: sub_uri.to_string(),
            additional_resources: Vec::new(),
            schema_version: SchemaVersion::new(1, 2, 0, 0),
            dictionary_length: 0,
            dictionary_signature: 0,
            schema_name: format!("Schema{}", id),
            oem_names: Vec::new(),
        };
        let path = dir.join(format!("pdr{}.bin", id));
        fs::write(&path, record.to_bytes().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_export_writes_schema_and_registry() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write_pdr(dir.path(), 1, 0, "redfish/v1", ""),
            write_pdr(dir.path(), 2, 1, "", "Chassis"),
        ];
        let out = dir.path().join("out");

        let count = export(&files, &out, &[OperationType::Read]).unwrap();
        assert_eq!(count, 2);

        let schema: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(SCHEMA_FILE)).unwrap()).unwrap();
        assert_eq!(schema["Resources"]["2"]["SubURI"], "Chassis");
        assert_eq!(schema["Resources"]["1"]["MajorSchemaName"], "Schema1");

        let registry = fs::read_to_string(out.join(REGISTRY_FILE)).unwrap();
        assert!(registry.contains("/redfish/v1/Chassis"));
    }

    #[test]
    fn test_export_rejects_bad_pdr() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.bin");
        fs::write(&bad, [0x01, 0x02, 0x03]).unwrap();
        assert!(export(&[bad], &dir.path().join("out"), &OperationType::ALL).is_err());
        assert!(!dir.path().join("out").join(REGISTRY_FILE).exists());
    }

    #[test]
    fn test_export_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.bin");
        let err = export(&[missing], dir.path(), &OperationType::ALL).unwrap_err();
        assert!(err.to_string().contains("missing.bin"));
    }
}
