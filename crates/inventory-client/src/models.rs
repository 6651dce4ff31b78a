//! Platform-neutral inventory models
//!
//! Every platform adapter normalises its inventory payload into these types.

use serde::{Deserialize, Serialize};

/// A source virtual machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    pub id: String,
    pub name: String,
    /// Source namespace (openshift only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub nics: Vec<Nic>,
    /// Raw platform power state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<String>,
    /// Inventory id of the host running the VM (vSphere)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Addresses reported by the guest tools (vSphere)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guest_networks: Vec<GuestNetwork>,
}

impl Vm {
    /// True when the platform reports the guest as running.
    pub fn is_powered_on(&self) -> bool {
        matches!(
            self.power_state.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("poweredon" | "on" | "up" | "active" | "running")
        )
    }

    /// Ids of networks referenced by the VM's NICs, in NIC order, deduplicated.
    pub fn network_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for nic in &self.nics {
            if !ids.contains(&nic.network) {
                ids.push(nic.network.clone());
            }
        }
        ids
    }

    /// Ids of storages backing the VM's disks, deduplicated.
    pub fn storage_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for disk in &self.disks {
            if let Some(storage) = &disk.storage {
                if !ids.contains(storage) {
                    ids.push(storage.clone());
                }
            }
        }
        ids
    }
}

/// A source disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Size in bytes
    #[serde(default)]
    pub capacity: i64,
    /// Id of the backing storage (datastore, storage domain, volume type, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// Platform file reference (vmdk path, OVA member path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub shared: bool,
}

/// A source network interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Nic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Id of the network the NIC is attached to
    pub network: String,
}

/// An IP address the guest reports on one of its NICs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GuestNetwork {
    pub mac: String,
    pub ip: String,
    pub prefix_length: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns: Vec<String>,
    /// Configured by hand in the guest rather than leased
    #[serde(default)]
    pub is_static: bool,
}

/// A source network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A source storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Direct ESXi data transport binding
#[derive(Clone, PartialEq, Eq, Default)]
pub struct HostBinding {
    /// Inventory id of the host
    pub host_id: String,
    /// Address of the data transport interface
    pub ip_address: String,
    pub user: String,
    pub password: String,
    pub insecure_skip_verify: bool,
    pub cacert: Option<String>,
}

impl std::fmt::Debug for HostBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBinding")
            .field("host_id", &self.host_id)
            .field("ip_address", &self.ip_address)
            .field("user", &self.user)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish_non_exhaustive()
    }
}
