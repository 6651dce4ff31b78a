//! Host CRD
//!
//! Per-ESXi-host data transport binding. The Provider is the controller owner;
//! every credential secret that serves the host adds a non-controller owner
//! reference to it.

use crate::condition::Condition;
use crate::references::ResourceRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "Host",
    namespaced,
    status = "HostStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    /// Owning vSphere provider
    pub provider: ResourceRef,

    /// Inventory id of the ESXi host
    pub id: String,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Address of the host's data transport interface
    pub ip_address: String,

    /// Host credentials (user, password, insecureSkipVerify?, cacert?)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<ResourceRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
