//! vSphere inventory parser
//!
//! Disks carry datastore refs and NICs carry network refs. A disk's id is its
//! backing file, `[datastore] folder/disk.vmdk`, which is also what the ESXi
//! file service and the xcopy populator address. Guest addresses come from
//! the guest tools; only manually configured ones count as static.

use super::{IdName, Ref, decode};
use crate::error::InventoryError;
use crate::models::{Disk, GuestNetwork, Network, Nic, Storage, Vm};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVm {
    id: String,
    name: String,
    #[serde(default)]
    power_state: Option<String>,
    #[serde(default)]
    host: Option<Ref>,
    #[serde(default)]
    disks: Vec<RawDisk>,
    #[serde(default)]
    nics: Vec<RawNic>,
    #[serde(default)]
    guest_networks: Vec<RawGuestNetwork>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGuestNetwork {
    mac: String,
    ip: String,
    #[serde(default)]
    prefix_length: u8,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    dns: Vec<String>,
    /// `manual`, `dhcp`, `linklayer`, ...
    #[serde(default)]
    origin: String,
}

#[derive(Debug, Deserialize)]
struct RawDisk {
    file: String,
    #[serde(default)]
    datastore: Ref,
    #[serde(default)]
    capacity: i64,
    #[serde(default)]
    shared: bool,
}

#[derive(Debug, Deserialize)]
struct RawNic {
    #[serde(default)]
    mac: Option<String>,
    network: Ref,
}

#[derive(Debug, Deserialize)]
struct RawDatastore {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    type_: Option<String>,
}

pub fn parse_vms(value: Value) -> Result<Vec<Vm>, InventoryError> {
    let raw: Vec<RawVm> = decode("vsphere vms", value)?;
    Ok(raw
        .into_iter()
        .map(|vm| Vm {
            id: vm.id,
            name: vm.name,
            namespace: None,
            disks: vm
                .disks
                .into_iter()
                .map(|d| Disk {
                    name: file_name(&d.file),
                    id: d.file.clone(),
                    capacity: d.capacity,
                    storage: Some(d.datastore.id).filter(|id| !id.is_empty()),
                    file: Some(d.file),
                    shared: d.shared,
                })
                .collect(),
            nics: vm
                .nics
                .into_iter()
                .map(|n| Nic {
                    name: None,
                    mac: n.mac,
                    network: n.network.id,
                })
                .collect(),
            power_state: vm.power_state,
            host: vm.host.map(|h| h.id).filter(|id| !id.is_empty()),
            guest_networks: vm
                .guest_networks
                .into_iter()
                .map(|g| GuestNetwork {
                    is_static: g.origin.eq_ignore_ascii_case("manual"),
                    mac: g.mac,
                    ip: g.ip,
                    prefix_length: g.prefix_length,
                    gateway: g.gateway.filter(|gw| !gw.is_empty()),
                    dns: g.dns,
                })
                .collect(),
        })
        .collect())
}

pub fn parse_networks(value: Value) -> Result<Vec<Network>, InventoryError> {
    let raw: Vec<IdName> = decode("vsphere networks", value)?;
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
    let raw: Vec<RawDatastore> = decode("vsphere datastores", value)?;
    Ok(raw
        .into_iter()
        .map(|d| Storage {
            id: d.id,
            name: d.name,
            type_: d.type_,
        })
        .collect())
}

/// Split `[datastore] folder/disk.vmdk` into datastore name and path.
pub fn split_vmdk_path(file: &str) -> Result<(&str, &str), InventoryError> {
    let rest = file
        .strip_prefix('[')
        .ok_or_else(|| InventoryError::SourceSchema(format!("invalid vmdk path {file}")))?;
    let (datastore, path) = rest
        .split_once(']')
        .ok_or_else(|| InventoryError::SourceSchema(format!("invalid vmdk path {file}")))?;
    let path = path.trim_start();
    if datastore.is_empty() || path.is_empty() {
        return Err(InventoryError::SourceSchema(format!("invalid vmdk path {file}")));
    }
    Ok((datastore, path))
}

fn file_name(file: &str) -> Option<String> {
    file.rsplit('/').next().map(str::to_string)
}
