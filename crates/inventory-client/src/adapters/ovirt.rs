//! oVirt inventory parser
//!
//! NICs reference vNIC profiles rather than networks; the profile listing maps
//! each profile to its network. Disks are reached through disk attachments and
//! carry their storage domain.

use super::{IdName, decode};
use crate::error::InventoryError;
use crate::models::{Disk, Network, Nic, Storage, Vm};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVm {
    id: String,
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    nics: Vec<RawNic>,
    #[serde(default)]
    disk_attachments: Vec<RawDiskAttachment>,
}

#[derive(Debug, Deserialize)]
struct RawNic {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mac: Option<String>,
    #[serde(default)]
    profile: String,
}

#[derive(Debug, Deserialize)]
struct RawDiskAttachment {
    disk: String,
}

#[derive(Debug, Deserialize)]
struct RawNicProfile {
    id: String,
    network: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDisk {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    storage_domain: Option<String>,
    #[serde(default)]
    provisioned_size: i64,
    #[serde(default)]
    shared: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStorageDomain {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    storage_type: Option<String>,
}

/// Parse VMs, resolving NIC profiles to networks and attachments to disks.
///
/// A NIC without a profile is unplugged and skipped. A NIC whose profile is
/// missing from the profile listing fails with `ItemNotFound`.
pub fn parse_vms(vms: Value, nic_profiles: Value, disks: Value) -> Result<Vec<Vm>, InventoryError> {
    let raw: Vec<RawVm> = decode("ovirt vms", vms)?;
    let profiles: Vec<RawNicProfile> = decode("ovirt nicprofiles", nic_profiles)?;
    let disks: Vec<RawDisk> = decode("ovirt disks", disks)?;

    let profile_network: HashMap<String, String> =
        profiles.into_iter().map(|p| (p.id, p.network)).collect();
    let disks_by_id: HashMap<String, RawDisk> =
        disks.into_iter().map(|d| (d.id.clone(), d)).collect();

    raw.into_iter()
        .map(|vm| {
            let mut nics = Vec::with_capacity(vm.nics.len());
            for nic in vm.nics {
                if nic.profile.is_empty() {
                    continue;
                }
                let network = profile_network.get(&nic.profile).ok_or_else(|| {
                    InventoryError::ItemNotFound(format!(
                        "nic profile {} of vm {}",
                        nic.profile, vm.name
                    ))
                })?;
                nics.push(Nic {
                    name: nic.name,
                    mac: nic.mac,
                    network: network.clone(),
                });
            }

            let disks = vm
                .disk_attachments
                .into_iter()
                .map(|a| match disks_by_id.get(&a.disk) {
                    Some(d) => Disk {
                        id: d.id.clone(),
                        name: d.name.clone(),
                        capacity: d.provisioned_size,
                        storage: d.storage_domain.clone(),
                        file: None,
                        shared: d.shared,
                    },
                    None => Disk {
                        id: a.disk,
                        ..Default::default()
                    },
                })
                .collect();

            Ok(Vm {
                id: vm.id,
                name: vm.name,
                namespace: None,
                disks,
                nics,
                power_state: vm.status,
                host: vm.host,
                guest_networks: Vec::new(),
            })
        })
        .collect()
}

pub fn parse_networks(value: Value) -> Result<Vec<Network>, InventoryError> {
    let raw: Vec<IdName> = decode("ovirt networks", value)?;
    Ok(raw
        .into_iter()
        .map(|n| Network {
            id: n.id,
            name: n.name,
            namespace: None,
        })
        .collect())
}

pub fn parse_storages(value: Value) -> Result<Vec<Storage>, InventoryError> {
    let raw: Vec<RawStorageDomain> = decode("ovirt storagedomains", value)?;
    Ok(raw
        .into_iter()
        .map(|s| Storage {
            id: s.id,
            name: s.name,
            type_: s.storage_type,
        })
        .collect())
}
