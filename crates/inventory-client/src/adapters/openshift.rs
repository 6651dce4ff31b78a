//! OpenShift (KubeVirt) inventory parser
//!
//! Networks are NetworkAttachmentDefinitions; storages are storage classes.
//! VM NICs name their multus network as `namespace/name` or bare `name`;
//! pod networks are not mappable and are skipped.

use super::{IdName, decode};
use crate::error::InventoryError;
use crate::models::{Disk, Network, Nic, Storage, Vm};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawVm {
    id: String,
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    object: RawVmObject,
}

#[derive(Debug, Default, Deserialize)]
struct RawVmObject {
    #[serde(default)]
    spec: RawVmSpec,
    #[serde(default)]
    status: Option<RawVmStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct RawVmSpec {
    #[serde(default)]
    template: RawTemplate,
}

#[derive(Debug, Default, Deserialize)]
struct RawTemplate {
    #[serde(default)]
    spec: RawTemplateSpec,
}

#[derive(Debug, Default, Deserialize)]
struct RawTemplateSpec {
    #[serde(default)]
    networks: Vec<RawNetwork>,
    #[serde(default)]
    volumes: Vec<RawVolume>,
}

#[derive(Debug, Deserialize)]
struct RawNetwork {
    name: String,
    #[serde(default)]
    multus: Option<RawMultus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMultus {
    network_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVolume {
    name: String,
    #[serde(default)]
    data_volume: Option<RawClaimRef>,
    #[serde(default)]
    persistent_volume_claim: Option<RawPvcRef>,
}

#[derive(Debug, Deserialize)]
struct RawClaimRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPvcRef {
    claim_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVmStatus {
    #[serde(default)]
    printable_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNad {
    id: String,
    name: String,
    #[serde(default)]
    namespace: String,
}

/// Find the NAD a multus network name refers to.
///
/// `namespace/name` is matched exactly first. Failing that, the first NAD
/// whose `namespace/name` contains the reference, or is contained by it.
pub fn match_nad<'a>(reference: &str, vm_namespace: &str, nads: &'a [Network]) -> Option<&'a Network> {
    let qualified = if reference.contains('/') {
        reference.to_string()
    } else {
        format!("{vm_namespace}/{reference}")
    };
    let key = |n: &Network| format!("{}/{}", n.namespace.as_deref().unwrap_or_default(), n.name);
    nads.iter().find(|n| key(n) == qualified).or_else(|| {
        nads.iter().find(|n| {
            let k = key(n);
            k.contains(reference) || reference.contains(&k)
        })
    })
}

pub fn parse_vms(vms: Value, nads: Value) -> Result<Vec<Vm>, InventoryError> {
    let raw: Vec<RawVm> = decode("openshift vms", vms)?;
    let nads = parse_networks(nads)?;
    raw.into_iter()
        .map(|vm| {
            let namespace = vm.namespace.clone().unwrap_or_default();
            let spec = vm.object.spec.template.spec;
            let mut nics = Vec::new();
            for net in spec.networks {
                let Some(multus) = net.multus else {
                    continue;
                };
                let nad = match_nad(&multus.network_name, &namespace, &nads).ok_or_else(|| {
                    InventoryError::ItemNotFound(format!(
                        "network attachment {} of vm {}/{}",
                        multus.network_name, namespace, vm.name
                    ))
                })?;
                nics.push(Nic {
                    name: Some(net.name),
                    mac: None,
                    network: nad.id.clone(),
                });
            }
            let disks = spec
                .volumes
                .into_iter()
                .filter_map(|v| {
                    let claim = v
                        .data_volume
                        .map(|d| d.name)
                        .or(v.persistent_volume_claim.map(|p| p.claim_name))?;
                    Some(Disk {
                        id: claim,
                        name: Some(v.name),
                        ..Default::default()
                    })
                })
                .collect();
            Ok(Vm {
                id: vm.id,
                name: vm.name,
                namespace: vm.namespace,
                disks,
                nics,
                power_state: vm.object.status.and_then(|s| s.printable_status),
                host: None,
                guest_networks: Vec::new(),
            })
        })
        .collect()
}

pub fn parse_networks(value: Value) -> Result<Vec<Network>, InventoryError> {
    let raw: Vec<RawNad> = decode("openshift networkattachmentdefinitions", value)?;
    Ok(raw
        .into_iter()
        .map(|n| Network {
            id: n.id,
            name: n.name,
            namespace: Some(n.namespace).filter(|ns| !ns.is_empty()),
        })
        .collect())
}

pub fn parse_storages(value: Value) -> Result<Vec<Storage>, InventoryError> {
    let raw: Vec<IdName> = decode("openshift storageclasses", value)?;
    Ok(raw
        .into_iter()
        .map(|s| Storage {
            id: s.id,
            name: s.name,
            type_: None,
        })
        .collect())
}
