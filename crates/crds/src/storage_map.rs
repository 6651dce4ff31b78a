//! StorageMap CRD
//!
//! Binds source storages (datastores, storage domains, volume types) to target
//! storage classes, optionally with a storage-array copy offload.

use crate::network_map::MapStatus;
use crate::references::{ProviderPair, SourceRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "StorageMap",
    namespaced,
    status = "MapStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StorageMapSpec {
    /// Source and destination providers
    pub provider: ProviderPair,

    /// Ordered storage pairs
    #[serde(default)]
    pub map: Vec<StoragePair>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoragePair {
    pub source: SourceRef,
    pub destination: DestinationStorage,

    /// Storage-array copy offload for this pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offload_plugin: Option<OffloadPlugin>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DestinationStorage {
    /// Target storage class (cluster scoped)
    pub storage_class: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<VolumeMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,
}

/// PersistentVolume mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum VolumeMode {
    Filesystem,
    Block,
}

impl VolumeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "Filesystem",
            Self::Block => "Block",
        }
    }
}

impl std::str::FromStr for VolumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Filesystem" => Ok(Self::Filesystem),
            "Block" => Ok(Self::Block),
            other => Err(format!("invalid volume mode '{other}', must be Filesystem or Block")),
        }
    }
}

/// PersistentVolume access mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadWriteMany,
    ReadOnlyMany,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadWriteOnce => "ReadWriteOnce",
            Self::ReadWriteMany => "ReadWriteMany",
            Self::ReadOnlyMany => "ReadOnlyMany",
        }
    }
}

impl std::str::FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ReadWriteOnce" => Ok(Self::ReadWriteOnce),
            "ReadWriteMany" => Ok(Self::ReadWriteMany),
            "ReadOnlyMany" => Ok(Self::ReadOnlyMany),
            other => Err(format!(
                "invalid access mode '{other}', must be ReadWriteOnce, ReadWriteMany or ReadOnlyMany"
            )),
        }
    }
}

/// Copy offload configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OffloadPlugin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsphere_xcopy_config: Option<VSphereXcopyPluginConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VSphereXcopyPluginConfig {
    /// Secret holding both vSphere and storage-array credentials
    #[serde(default)]
    pub secret_ref: String,

    pub storage_vendor_product: StorageVendorProduct,
}

/// Storage arrays that support vSphere xcopy offload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum StorageVendorProduct {
    #[serde(rename = "flashsystem")]
    FlashSystem,
    #[serde(rename = "vantara")]
    Vantara,
    #[serde(rename = "ontap")]
    Ontap,
    #[serde(rename = "primera3par")]
    Primera3Par,
    #[serde(rename = "pureFlashArray")]
    PureFlashArray,
    #[serde(rename = "powerflex")]
    PowerFlex,
    #[serde(rename = "powermax")]
    PowerMax,
    #[serde(rename = "powerstore")]
    PowerStore,
    #[serde(rename = "infinibox")]
    Infinibox,
}

impl StorageVendorProduct {
    pub const ALL: [StorageVendorProduct; 9] = [
        Self::FlashSystem,
        Self::Vantara,
        Self::Ontap,
        Self::Primera3Par,
        Self::PureFlashArray,
        Self::PowerFlex,
        Self::PowerMax,
        Self::PowerStore,
        Self::Infinibox,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FlashSystem => "flashsystem",
            Self::Vantara => "vantara",
            Self::Ontap => "ontap",
            Self::Primera3Par => "primera3par",
            Self::PureFlashArray => "pureFlashArray",
            Self::PowerFlex => "powerflex",
            Self::PowerMax => "powermax",
            Self::PowerStore => "powerstore",
            Self::Infinibox => "infinibox",
        }
    }
}

impl std::fmt::Display for StorageVendorProduct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageVendorProduct {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
                format!("invalid offload vendor '{s}', must be one of: {}", valid.join(", "))
            })
    }
}
