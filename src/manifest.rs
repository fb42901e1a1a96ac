//! OVMS manifest: the document tying kernel, initrd, disk layers, an optional
//! RAM snapshot and devices together into one bootable artifact.
//!
//! Plain data decoded and encoded at the edges. The conversion pipeline
//! produces disk images that end up referenced from [`DiskLayer`] entries but
//! never builds a manifest itself.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MEDIA_TYPE: &str = "application/vnd.ovms.manifest.v1+json";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unsupported schemaVersion {0} (expected {})", SCHEMA_VERSION)]
    SchemaVersion(u32),

    #[error("unexpected mediaType {0:?} (expected {:?})", MEDIA_TYPE)]
    MediaType(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: String,
    pub name: String,
    pub version: String,
    pub kernel: Kernel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd: Option<Initrd>,
    pub disk_layers: Vec<DiskLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_snapshot: Option<RamSnapshot>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub runtime_hints: RuntimeHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initrd {
    #[serde(rename = "ref")]
    pub reference: String,
}

/// One block device image, in boot order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskLayer {
    /// Content reference, e.g. `sha256:<hex>`.
    #[serde(rename = "ref")]
    pub reference: String,
    pub format: String,
    /// Size in bytes.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamSnapshot {
    #[serde(rename = "ref")]
    pub reference: String,
    pub compression: String,
    #[serde(default)]
    pub preload_hint: bool,
    #[serde(default)]
    pub mlock_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mmio_addr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub author: String,
    /// RFC 3339 timestamp, kept as written.
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub platform: Platform,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub uefi: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeHints {
    /// Most preferred first.
    #[serde(default)]
    pub preferred_runtime: Vec<String>,
    #[serde(default)]
    pub cold_start_target_ms: u64,
}

impl Manifest {
    /// Decode and check the schema version and media type.
    pub fn from_slice(data: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_slice(data)?;
        if manifest.schema_version != SCHEMA_VERSION {
            return Err(ManifestError::SchemaVersion(manifest.schema_version));
        }
        if manifest.media_type != MEDIA_TYPE {
            return Err(ManifestError::MediaType(manifest.media_type));
        }
        Ok(manifest)
    }

    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let data = std::fs::read(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_slice(&data)
    }

    pub fn total_disk_size(&self) -> u64 {
        self.disk_layers.iter().map(|l| l.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU: &str = include_str!("../tests/fixtures/ubuntu-manifest.json");

    #[test]
    fn test_decode_example_manifest() {
        let m = Manifest::from_slice(UBUNTU.as_bytes()).unwrap();
        assert_eq!(m.schema_version, 1);
        assert_eq!(m.media_type, MEDIA_TYPE);
        assert_eq!(m.name, "ubuntu");
        assert_eq!(m.disk_layers.len(), 2);
        assert_eq!(m.disk_layers[0].format, "raw");
        assert_eq!(m.devices[0].mmio_addr, "0xd0000000");
        assert_eq!(
            m.runtime_hints.preferred_runtime,
            vec!["firecracker", "cloud-hypervisor"]
        );
        let snap = m.ram_snapshot.as_ref().unwrap();
        assert!(snap.preload_hint);
        assert!(!snap.mlock_required);
        assert!(m.metadata.platform.uefi);
    }

    #[test]
    fn test_encode_uses_wire_field_names() {
        let m = Manifest::from_slice(UBUNTU.as_bytes()).unwrap();
        let value = serde_json::to_value(&m).unwrap();

        assert_eq!(value["schemaVersion"], 1);
        assert_eq!(value["diskLayers"][0]["ref"], m.disk_layers[0].reference);
        assert_eq!(value["ramSnapshot"]["preload_hint"], true);
        assert_eq!(value["devices"][0]["type"], "virtio-blk");
        assert_eq!(value["runtimeHints"]["coldStartTargetMs"], 150);
        assert_eq!(value["metadata"]["platform"]["arch"], "amd64");
    }

    #[test]
    fn test_optional_sections_may_be_absent() {
        let json = format!(
            r#"{{"schemaVersion":1,"mediaType":"{MEDIA_TYPE}","name":"tiny","version":"0.1",
                "kernel":{{"ref":"sha256:aa"}},"diskLayers":[]}}"#
        );
        let m = Manifest::from_slice(json.as_bytes()).unwrap();
        assert!(m.initrd.is_none());
        assert!(m.ram_snapshot.is_none());
        assert!(m.devices.is_empty());
        assert_eq!(m.runtime_hints, RuntimeHints::default());

        let value = serde_json::to_value(&m).unwrap();
        assert!(value.get("ramSnapshot").is_none());
    }

    #[test]
    fn test_rejects_wrong_schema_version() {
        let json = UBUNTU.replacen("\"schemaVersion\": 1", "\"schemaVersion\": 2", 1);
        assert!(matches!(
            Manifest::from_slice(json.as_bytes()),
            Err(ManifestError::SchemaVersion(2))
        ));
    }

    #[test]
    fn test_rejects_wrong_media_type() {
        let json = UBUNTU.replacen(MEDIA_TYPE, "application/json", 1);
        assert!(matches!(
            Manifest::from_slice(json.as_bytes()),
            Err(ManifestError::MediaType(_))
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let json = format!(r#"{{"schemaVersion":1,"mediaType":"{MEDIA_TYPE}","name":"x"}}"#);
        assert!(matches!(
            Manifest::from_slice(json.as_bytes()),
            Err(ManifestError::Decode(_))
        ));
    }

    #[test]
    fn test_total_disk_size() {
        let m = Manifest::from_slice(UBUNTU.as_bytes()).unwrap();
        assert_eq!(m.total_disk_size(), 2147483648 + 104857600);
    }
}
