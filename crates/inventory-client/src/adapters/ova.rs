//! OVA inventory parser
//!
//! The OVA provider server emits capital-cased `ID` fields. Storages are the
//! archive's disks, so their ids are only meaningful inside one archive.

use super::decode;
use crate::error::InventoryError;
use crate::models::{Disk, Network, Nic, Storage, Vm};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawVm {
    #[serde(alias = "ID")]
    id: String,
    #[serde(alias = "Name")]
    name: String,
    #[serde(default)]
    disks: Vec<RawDisk>,
    #[serde(default)]
    nics: Vec<RawNic>,
}

#[derive(Debug, Deserialize)]
struct RawDisk {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default, rename = "Name")]
    name: Option<String>,
    #[serde(default, rename = "FilePath")]
    file_path: Option<String>,
    #[serde(default, rename = "Capacity")]
    capacity: i64,
}

#[derive(Debug, Deserialize)]
struct RawNic {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mac: Option<String>,
    /// Network name
    #[serde(default, rename = "Network")]
    network: String,
}

#[derive(Debug, Deserialize)]
struct RawNetwork {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

/// Parse VMs; NIC network names are resolved to network ids.
pub fn parse_vms(vms: Value, networks: Value) -> Result<Vec<Vm>, InventoryError> {
    let raw: Vec<RawVm> = decode("ova vms", vms)?;
    let networks = parse_networks(networks)?;
    raw.into_iter()
        .map(|vm| {
            let nics = vm
                .nics
                .into_iter()
                .map(|nic| {
                    let network = networks
                        .iter()
                        .find(|n| n.name == nic.network || n.id == nic.network)
                        .ok_or_else(|| {
                            InventoryError::ItemNotFound(format!(
                                "network {} of vm {}",
                                nic.network, vm.name
                            ))
                        })?;
                    Ok(Nic {
                        name: nic.name,
                        mac: nic.mac,
                        network: network.id.clone(),
                    })
                })
                .collect::<Result<Vec<_>, InventoryError>>()?;
            Ok(Vm {
                id: vm.id,
                name: vm.name,
                namespace: None,
                disks: vm
                    .disks
                    .into_iter()
                    .map(|d| Disk {
                        // The disk is its own storage.
                        storage: Some(d.id.clone()),
                        id: d.id,
                        name: d.name,
                        capacity: d.capacity,
                        file: d.file_path,
                        shared: false,
                    })
                    .collect(),
                nics,
                power_state: None,
                host: None,
                guest_networks: Vec::new(),
            })
        })
        .collect()
}

pub fn parse_networks(value: Value) -> Result<Vec<Network>, InventoryError> {
    let raw: Vec<RawNetwork> = decode("ova networks", value)?;
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
    let raw: Vec<RawDisk> = decode("ova storages", value)?;
    Ok(raw
        .into_iter()
        .map(|d| Storage {
            name: d.name.unwrap_or_else(|| d.id.clone()),
            id: d.id,
            type_: None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capital_cased_ids() {
        let vms = json!([{
            "id": "ova-vm-1",
            "name": "appliance",
            "disks": [{"ID": "disk-1", "Name": "disk1.vmdk", "FilePath": "/ova/app.ova", "Capacity": 10}],
            "nics": [{"name": "eth0", "mac": "00:11:22:33:44:55", "Network": "VM Network"}]
        }]);
        let networks = json!([{"ID": "net-1", "Name": "VM Network"}]);
        let parsed = parse_vms(vms, networks).unwrap();
        let vm = &parsed[0];
        assert_eq!(vm.disks[0].id, "disk-1");
        assert_eq!(vm.disks[0].storage.as_deref(), Some("disk-1"));
        assert_eq!(vm.disks[0].file.as_deref(), Some("/ova/app.ova"));
        assert_eq!(vm.nics[0].network, "net-1");
    }

    #[test]
    fn test_lower_case_disk_id_is_a_schema_error() {
        let err = parse_storages(json!([{"id": "disk-1"}])).unwrap_err();
        assert_eq!(err.reason(), "SourceSchema");
    }
}
