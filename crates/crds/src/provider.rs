//! Provider CRD
//!
//! One source or destination virtualization platform instance.

use crate::condition::Condition;
use crate::references::ResourceRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings key selecting the vSphere SDK endpoint
pub const SETTING_SDK_ENDPOINT: &str = "sdkEndpoint";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "Provider",
    namespaced,
    status = "ProviderStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Platform type
    #[serde(rename = "type")]
    pub type_: ProviderType,

    /// Endpoint URL (empty for the local openshift cluster)
    #[serde(default)]
    pub url: String,

    /// Credentials secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<ResourceRef>,

    /// Provider specific settings (e.g. `sdkEndpoint: esxi`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

impl ProviderSpec {
    /// True when a vSphere provider talks to ESXi hosts directly.
    pub fn uses_esxi_endpoint(&self) -> bool {
        self.type_ == ProviderType::Vsphere
            && self
                .settings
                .get(SETTING_SDK_ENDPOINT)
                .is_some_and(|v| v == SdkEndpoint::Esxi.as_str())
    }
}

/// Supported platform types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    Vsphere,
    Ovirt,
    Openstack,
    Ova,
    Ec2,
    Openshift,
}

impl ProviderType {
    /// Lower-case name as used on the wire and in inventory paths
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vsphere => "vsphere",
            Self::Ovirt => "ovirt",
            Self::Openstack => "openstack",
            Self::Ova => "ova",
            Self::Ec2 => "ec2",
            Self::Openshift => "openshift",
        }
    }

    /// Platforms whose guests need a virt-v2v conversion pass
    pub fn requires_conversion(self) -> bool {
        matches!(self, Self::Vsphere | Self::Ova | Self::Ec2)
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vsphere" => Ok(Self::Vsphere),
            "ovirt" => Ok(Self::Ovirt),
            "openstack" => Ok(Self::Openstack),
            "ova" => Ok(Self::Ova),
            "ec2" => Ok(Self::Ec2),
            "openshift" => Ok(Self::Openshift),
            other => Err(format!("unknown provider type: {other}")),
        }
    }
}

/// vSphere SDK endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkEndpoint {
    Vcenter,
    Esxi,
}

impl SdkEndpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vcenter => "vcenter",
            Self::Esxi => "esxi",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    /// Readiness and connection conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation observed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
