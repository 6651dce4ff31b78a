//! OpenStack inventory parser
//!
//! A volume's `volumeType` may hold either the type's id or its name; both are
//! tried. Storages are volume types.

use super::{IdName, decode};
use crate::error::InventoryError;
use crate::models::{Disk, Network, Nic, Storage, Vm};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Source storage name denoting the target's default storage type
pub const DEFAULT_VOLUME_TYPE: &str = "__DEFAULT__";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVm {
    id: String,
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    image: Option<RawImageRef>,
    #[serde(default)]
    attached_volumes: Vec<RawAttachedVolume>,
    /// Network name to addresses
    #[serde(default)]
    addresses: BTreeMap<String, Vec<RawAddress>>,
}

#[derive(Debug, Deserialize)]
struct RawImageRef {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawAttachedVolume {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    #[serde(default, rename = "OS-EXT-IPS-MAC:mac_addr")]
    mac: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVolume {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    volume_type: String,
    /// GiB
    #[serde(default)]
    size: i64,
}

/// Resolve a volume's `volumeType` against the volume type listing.
///
/// Ids win over names. Returns `None` when neither matches.
pub fn resolve_volume_type(name_or_id: &str, types: &[Storage]) -> Option<String> {
    if name_or_id.is_empty() {
        return None;
    }
    types
        .iter()
        .find(|t| t.id == name_or_id)
        .or_else(|| types.iter().find(|t| t.name == name_or_id))
        .map(|t| t.id.clone())
}

/// Parse VMs with their attached volumes and networks resolved.
pub fn parse_vms(
    vms: Value,
    volumes: Value,
    volume_types: Value,
    networks: Value,
) -> Result<Vec<Vm>, InventoryError> {
    let raw: Vec<RawVm> = decode("openstack vms", vms)?;
    let volumes: Vec<RawVolume> = decode("openstack volumes", volumes)?;
    let types = parse_storages(volume_types)?;
    let networks = parse_networks(networks)?;

    let volumes: HashMap<String, RawVolume> =
        volumes.into_iter().map(|v| (v.id.clone(), v)).collect();

    raw.into_iter()
        .map(|vm| {
            let mut disks: Vec<Disk> = vm
                .attached_volumes
                .iter()
                .map(|a| match volumes.get(&a.id) {
                    Some(v) => Disk {
                        id: v.id.clone(),
                        name: v.name.clone(),
                        capacity: v.size * 1024 * 1024 * 1024,
                        storage: resolve_volume_type(&v.volume_type, &types),
                        file: None,
                        shared: false,
                    },
                    None => Disk {
                        id: a.id.clone(),
                        ..Default::default()
                    },
                })
                .collect();
            // Image-booted instances have no volumes; the image is the disk.
            if disks.is_empty() {
                if let Some(image) = vm.image.as_ref().filter(|i| !i.id.is_empty()) {
                    disks.push(Disk {
                        id: image.id.clone(),
                        ..Default::default()
                    });
                }
            }

            let mut nics = Vec::new();
            for (network_name, addresses) in &vm.addresses {
                let network = networks
                    .iter()
                    .find(|n| &n.name == network_name)
                    .ok_or_else(|| {
                        InventoryError::ItemNotFound(format!(
                            "network {} of vm {}",
                            network_name, vm.name
                        ))
                    })?;
                nics.push(Nic {
                    name: Some(network_name.clone()),
                    mac: addresses.iter().find_map(|a| a.mac.clone()),
                    network: network.id.clone(),
                });
            }

            Ok(Vm {
                id: vm.id,
                name: vm.name,
                namespace: None,
                disks,
                nics,
                power_state: vm.status,
                host: None,
                guest_networks: Vec::new(),
            })
        })
        .collect()
}

pub fn parse_networks(value: Value) -> Result<Vec<Network>, InventoryError> {
    let raw: Vec<IdName> = decode("openstack networks", value)?;
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
    let raw: Vec<IdName> = decode("openstack volumetypes", value)?;
    Ok(raw
        .into_iter()
        .map(|t| Storage {
            id: t.id,
            name: t.name,
            type_: None,
        })
        .collect())
}
