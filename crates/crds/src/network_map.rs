//! NetworkMap CRD
//!
//! Binds source networks to pod networking, a multus NetworkAttachmentDefinition,
//! or nothing at all.

use crate::condition::Condition;
use crate::references::{ProviderPair, SourceRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "NetworkMap",
    namespaced,
    status = "MapStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMapSpec {
    /// Source and destination providers
    pub provider: ProviderPair,

    /// Ordered network pairs
    #[serde(default)]
    pub map: Vec<NetworkPair>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPair {
    pub source: SourceRef,
    pub destination: DestinationNetwork,
}

/// Destination network types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Pod network
    #[default]
    Pod,
    /// Multus NetworkAttachmentDefinition
    Multus,
    /// Not connected on the target
    Ignored,
}

impl NetworkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Multus => "multus",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DestinationNetwork {
    #[serde(rename = "type")]
    pub type_: NetworkType,

    /// NAD name (multus only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// NAD namespace (multus only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl DestinationNetwork {
    pub fn pod() -> Self {
        Self {
            type_: NetworkType::Pod,
            name: None,
            namespace: None,
        }
    }

    pub fn ignored() -> Self {
        Self {
            type_: NetworkType::Ignored,
            name: None,
            namespace: None,
        }
    }

    pub fn multus(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_: NetworkType::Multus,
            name: Some(name.into()),
            namespace: Some(namespace.into()),
        }
    }
}

/// Status shared by NetworkMap and StorageMap
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MapStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
