//! Plan CRD
//!
//! Declarative migration recipe bound to one source and destination provider.

use crate::condition::Condition;
use crate::migration::VmStatus;
use crate::references::{ProviderPair, ResourceRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "Plan",
    namespaced,
    status = "PlanStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    /// Source and destination providers
    pub provider: ProviderPair,

    /// Network and storage maps
    #[serde(default)]
    pub map: PlanMaps,

    /// Namespace the target VMs are created in
    pub target_namespace: String,

    /// VMs to migrate
    #[serde(default)]
    pub vms: Vec<PlanVm>,

    /// Migration variant
    #[serde(default, rename = "type")]
    pub type_: MigrationType,

    /// Network used for disk transfer (NAD reference)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_network: Option<ResourceRef>,

    /// Hand the guest's manually configured addresses to the conversion
    #[serde(default)]
    pub preserve_static_ips: bool,

    #[serde(default)]
    pub migrate_shared_disks: bool,

    /// Inspect each guest before any disk is transferred
    #[serde(default)]
    pub run_preflight_inspection: bool,

    /// SATA disks and e1000e NICs instead of virtio
    #[serde(default)]
    pub compatibility_mode: bool,

    #[serde(default)]
    pub pvc_name_template_use_generate_name: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanMaps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ResourceRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<ResourceRef>,
}

/// A VM listed in a plan
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanVm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    /// Source namespace (openshift source only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl PlanVm {
    /// Key used in logs and VM status entries
    pub fn key(&self) -> String {
        match (&self.id, &self.namespace) {
            (Some(id), _) if !id.is_empty() => id.clone(),
            (_, Some(ns)) if !ns.is_empty() => format!("{}/{}", ns, self.name),
            _ => self.name.clone(),
        }
    }
}

/// Migration variants
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationType {
    /// Source powered off before transfer
    #[default]
    Cold,
    /// Copy while the source runs, then cut over
    Warm,
    /// In-place live migration (openshift source only)
    Live,
    /// Disks are already in place; only convert and define the VM
    ConversionOnly,
}

impl MigrationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Warm => "warm",
            Self::Live => "live",
            Self::ConversionOnly => "conversion-only",
        }
    }

    /// Conversion-only plans carry no storage map; every other type requires one.
    pub fn requires_storage_map(self) -> bool {
        self != Self::ConversionOnly
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    /// Ready, Executing, Succeeded, Failed
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// VMs resolved against inventory (dropped VMs excluded)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_vms: Vec<PlanVm>,

    /// Observed state of each VM in the latest migration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vms: Vec<VmStatus>,

    /// Latest migration executed for this plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration: Option<ResourceRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
