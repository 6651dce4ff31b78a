//! EC2 inventory parser
//!
//! Every EC2 record arrives wrapped as `{id, name, object: {...}}` with the
//! AWS API shape inside `object`. Networks are subnets or VPCs; storages are
//! EBS volume types.

use super::decode;
use crate::error::InventoryError;
use crate::models::{Disk, Network, Nic, Storage, Vm};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// EBS volume types from most to least preferred
pub const VOLUME_TYPE_PRIORITY: [&str; 7] = ["gp3", "gp2", "io2", "io1", "st1", "sc1", "standard"];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    object: T,
}

/// Unwrap inventory envelopes into their `(id, name, object)` parts.
fn extract<T: DeserializeOwned>(what: &str, value: Value) -> Result<Vec<(String, String, T)>, InventoryError> {
    let raw: Vec<Envelope<T>> = decode(what, value)?;
    Ok(raw.into_iter().map(|e| (e.id, e.name, e.object)).collect())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

fn name_tag(tags: &[Tag]) -> Option<String> {
    tags.iter()
        .find(|t| t.key == "Name" && !t.value.is_empty())
        .map(|t| t.value.clone())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInstance {
    instance_id: String,
    #[serde(default)]
    state: Option<RawState>,
    #[serde(default)]
    block_device_mappings: Vec<RawBlockDevice>,
    #[serde(default)]
    network_interfaces: Vec<RawInterface>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawBlockDevice {
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    ebs: Option<RawEbs>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEbs {
    volume_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInterface {
    #[serde(default)]
    subnet_id: Option<String>,
    #[serde(default)]
    vpc_id: Option<String>,
    #[serde(default)]
    mac_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVolume {
    volume_id: String,
    #[serde(default)]
    volume_type: String,
    /// GiB
    #[serde(default)]
    size: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNetwork {
    #[serde(default)]
    subnet_id: Option<String>,
    #[serde(default)]
    vpc_id: Option<String>,
    #[serde(default)]
    cidr_block: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct RawStorage {
    #[serde(default, rename = "type")]
    type_: String,
}

/// Lowercased EBS volume type; empty types become `unknown`.
pub fn normalize_volume_type(volume_type: &str) -> String {
    let t = volume_type.trim().to_ascii_lowercase();
    if t.is_empty() { "unknown".to_string() } else { t }
}

/// Sort rank of an EBS volume type; unknown types sort last.
pub fn volume_type_rank(volume_type: &str) -> usize {
    VOLUME_TYPE_PRIORITY
        .iter()
        .position(|t| *t == volume_type)
        .unwrap_or(VOLUME_TYPE_PRIORITY.len())
}

/// Parse instances with their EBS volumes resolved.
pub fn parse_vms(vms: Value, volumes: Value) -> Result<Vec<Vm>, InventoryError> {
    let instances: Vec<(String, String, RawInstance)> = extract("ec2 vms", vms)?;
    let volumes: Vec<(String, String, RawVolume)> = extract("ec2 volumes", volumes)?;
    let volumes: HashMap<String, RawVolume> = volumes
        .into_iter()
        .map(|(_, _, v)| (v.volume_id.clone(), v))
        .collect();

    Ok(instances
        .into_iter()
        .map(|(id, name, inst)| {
            let disks = inst
                .block_device_mappings
                .iter()
                .filter_map(|b| b.ebs.as_ref().map(|ebs| (b, ebs)))
                .map(|(b, ebs)| match volumes.get(&ebs.volume_id) {
                    Some(v) => Disk {
                        id: v.volume_id.clone(),
                        name: b.device_name.clone(),
                        capacity: v.size * 1024 * 1024 * 1024,
                        storage: Some(normalize_volume_type(&v.volume_type)),
                        file: None,
                        shared: false,
                    },
                    None => Disk {
                        id: ebs.volume_id.clone(),
                        name: b.device_name.clone(),
                        ..Default::default()
                    },
                })
                .collect();
            let nics = inst
                .network_interfaces
                .into_iter()
                .filter_map(|n| {
                    let network = n.subnet_id.or(n.vpc_id)?;
                    Some(Nic {
                        name: None,
                        mac: n.mac_address,
                        network,
                    })
                })
                .collect();
            let id = if id.is_empty() { inst.instance_id } else { id };
            let name = name_tag(&inst.tags)
                .or(Some(name).filter(|n| !n.is_empty()))
                .unwrap_or_else(|| id.clone());
            Vm {
                id,
                name,
                namespace: None,
                disks,
                nics,
                power_state: inst.state.map(|s| s.name),
                host: None,
                guest_networks: Vec::new(),
            }
        })
        .collect())
}

/// Parse networks: subnets by ascending CIDR block, then VPCs by ascending id.
///
/// The first entry is the preferred default source network.
pub fn parse_networks(value: Value) -> Result<Vec<Network>, InventoryError> {
    let raw: Vec<(String, String, RawNetwork)> = extract("ec2 networks", value)?;
    let mut subnets = Vec::new();
    let mut vpcs = Vec::new();
    for (id, name, net) in raw {
        let display = name_tag(&net.tags).or(Some(name).filter(|n| !n.is_empty()));
        if let Some(subnet_id) = net.subnet_id {
            let id = if id.is_empty() { subnet_id } else { id };
            subnets.push((net.cidr_block.unwrap_or_default(), network(id, display)));
        } else if let Some(vpc_id) = net.vpc_id {
            let id = if id.is_empty() { vpc_id } else { id };
            vpcs.push(network(id, display));
        }
    }
    subnets.sort_by(|(a, _), (b, _)| compare_cidr(a, b));
    vpcs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(subnets.into_iter().map(|(_, n)| n).chain(vpcs).collect())
}

fn network(id: String, name: Option<String>) -> Network {
    Network {
        name: name.unwrap_or_else(|| id.clone()),
        id,
        namespace: None,
    }
}

/// Order CIDR blocks by network address then prefix length.
fn compare_cidr(a: &str, b: &str) -> Ordering {
    fn key(cidr: &str) -> Option<(Ipv4Addr, u8)> {
        let (addr, prefix) = cidr.split_once('/')?;
        Some((addr.parse().ok()?, prefix.parse().ok()?))
    }
    match (key(a), key(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Parse storages as distinct EBS volume types in priority order.
pub fn parse_storages(value: Value) -> Result<Vec<Storage>, InventoryError> {
    let raw: Vec<(String, String, RawStorage)> = extract("ec2 storages", value)?;
    let mut types: Vec<String> = Vec::new();
    for (_, _, s) in raw {
        let t = normalize_volume_type(&s.type_);
        if !types.contains(&t) {
            types.push(t);
        }
    }
    types.sort_by(|a, b| volume_type_rank(a).cmp(&volume_type_rank(b)).then_with(|| a.cmp(b)));
    Ok(types
        .into_iter()
        .map(|t| Storage {
            id: t.clone(),
            name: t.clone(),
            type_: Some(t),
        })
        .collect())
}
