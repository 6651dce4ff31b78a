//! Default maps for plans created without explicit pairs
//!
//! Networks: on openshift-to-openshift plans every source maps to the
//! same-named NAD when all of them have one. Otherwise the first source goes to
//! the default target and the rest are ignored.
//!
//! Storage: openshift-to-openshift plans map same-named classes when all
//! sources have one. EC2 picks an EBS-backed class per volume type. Everything
//! else maps to the default class.

use crate::parse::NetworkTarget;
use crds::{
    AccessMode, DestinationNetwork, DestinationStorage, NetworkPair, ProviderType, SourceRef, StoragePair,
    VolumeMode,
};
use inventory_client::adapters::openstack::DEFAULT_VOLUME_TYPE;
use inventory_client::{Network, Storage, Vm};
use tracing::{debug, warn};

/// KubeVirt's default class for virtual machine disks
pub const DEFAULT_VIRT_CLASS_ANNOTATION: &str = "storageclass.kubevirt.io/is-default-virt-class";

/// The cluster-wide default class
pub const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

/// A NetworkAttachmentDefinition on the destination cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetNetwork {
    pub namespace: String,
    pub name: String,
}

/// A storage class on the destination cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStorageClass {
    pub name: String,
    pub is_default_virt: bool,
    pub is_default: bool,
}

impl TargetStorageClass {
    /// Build from a class name and its annotations.
    pub fn from_annotations<'a>(
        name: impl Into<String>,
        annotations: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Self {
        let mut class = Self {
            name: name.into(),
            ..Default::default()
        };
        for (key, value) in annotations {
            let set = value == "true";
            match key.as_str() {
                DEFAULT_VIRT_CLASS_ANNOTATION => class.is_default_virt = set,
                DEFAULT_CLASS_ANNOTATION => class.is_default = set,
                _ => {}
            }
        }
        class
    }
}

/// Source networks referenced by the plan's VMs, in first-use order.
pub fn source_networks_for(vms: &[Vm], networks: &[Network]) -> Vec<Network> {
    let mut used: Vec<Network> = Vec::new();
    for id in vms.iter().flat_map(|vm| vm.network_ids()) {
        match networks.iter().find(|n| n.id == id) {
            Some(n) if !used.iter().any(|u| u.id == n.id) => used.push(n.clone()),
            Some(_) => {}
            None => warn!("Network {} referenced by a VM is not in the inventory", id),
        }
    }
    used
}

/// Source storages referenced by the plan's VMs, in first-use order.
///
/// OpenStack disks without a volume type use the default type.
pub fn source_storages_for(vms: &[Vm], storages: &[Storage], provider_type: ProviderType) -> Vec<Storage> {
    let mut used: Vec<Storage> = Vec::new();
    for disk in vms.iter().flat_map(|vm| vm.disks.iter()) {
        let storage = match &disk.storage {
            Some(id) => storages.iter().find(|s| &s.id == id).cloned(),
            None if provider_type == ProviderType::Openstack => Some(Storage {
                id: String::new(),
                name: DEFAULT_VOLUME_TYPE.to_string(),
                type_: Some("default".to_string()),
            }),
            None => None,
        };
        match storage {
            Some(s) if !used.iter().any(|u| u.id == s.id && u.name == s.name) => used.push(s),
            Some(_) => {}
            None => debug!("Disk {} has no resolvable storage", disk.id),
        }
    }
    used
}

fn network_source_ref(network: &Network) -> SourceRef {
    SourceRef {
        id: Some(network.id.clone()).filter(|id| !id.is_empty()),
        name: Some(network.name.clone()),
        namespace: network.namespace.clone(),
        type_: None,
    }
}

/// Reference for a storage, following each platform's identity rules.
pub fn storage_source_ref(provider_type: ProviderType, storage: &Storage) -> SourceRef {
    match provider_type {
        ProviderType::Openshift => SourceRef::by_name(storage.name.clone()),
        ProviderType::Ec2 => SourceRef::by_name(storage.type_.clone().unwrap_or_else(|| storage.name.clone())),
        _ if storage.id.is_empty() && storage.type_.as_deref() == Some("default") => SourceRef {
            type_: Some("default".to_string()),
            ..Default::default()
        },
        _ => SourceRef {
            id: Some(storage.id.clone()),
            name: Some(storage.name.clone()),
            ..Default::default()
        },
    }
}

/// Parse a user-supplied default network: `default`, `ignored`, `ns/name`, or
/// a bare NAD name in the plan namespace.
pub fn parse_default_network(value: &str, plan_namespace: &str) -> Option<DestinationNetwork> {
    NetworkTarget::parse(value, plan_namespace)
        .ok()
        .map(|target| target.to_destination())
}

/// Default network target: the user's choice, else the first NAD, else pod.
pub fn default_network_target(
    user_default: Option<&str>,
    plan_namespace: &str,
    targets: &[TargetNetwork],
) -> DestinationNetwork {
    if let Some(destination) = user_default
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| parse_default_network(v, plan_namespace))
    {
        return destination;
    }
    targets
        .first()
        .map(|nad| DestinationNetwork::multus(nad.namespace.clone(), nad.name.clone()))
        .unwrap_or_else(DestinationNetwork::pod)
}

fn same_name_networks(sources: &[Network], targets: &[TargetNetwork]) -> Option<Vec<NetworkPair>> {
    if sources.is_empty() || sources.len() > targets.len() {
        return None;
    }
    sources
        .iter()
        .map(|source| {
            targets.iter().find(|t| t.name == source.name).map(|t| NetworkPair {
                source: network_source_ref(source),
                destination: DestinationNetwork::multus(t.namespace.clone(), t.name.clone()),
            })
        })
        .collect()
}

/// Network pairs for the plan's source networks.
pub fn default_network_pairs(
    provider_type: ProviderType,
    sources: &[Network],
    targets: &[TargetNetwork],
    user_default: Option<&str>,
    plan_namespace: &str,
) -> Vec<NetworkPair> {
    if provider_type == ProviderType::Openshift && user_default.is_none() {
        if let Some(pairs) = same_name_networks(sources, targets) {
            debug!("Mapped {} network(s) by name", pairs.len());
            return pairs;
        }
    }
    let default = default_network_target(user_default, plan_namespace, targets);
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| NetworkPair {
            source: network_source_ref(source),
            destination: if i == 0 {
                default.clone()
            } else {
                DestinationNetwork::ignored()
            },
        })
        .collect()
}

/// Default class: the user's choice, then the virt default, then the cluster
/// default, then a class named for virtualization, then the first class.
pub fn select_default_storage_class(classes: &[TargetStorageClass], user_default: Option<&str>) -> String {
    if let Some(name) = user_default.map(str::trim).filter(|v| !v.is_empty()) {
        return name.to_string();
    }
    classes
        .iter()
        .find(|c| c.is_default_virt)
        .or_else(|| classes.iter().find(|c| c.is_default))
        .or_else(|| classes.iter().find(|c| c.name.contains("virtualization")))
        .or_else(|| classes.first())
        .map(|c| c.name.clone())
        .unwrap_or_default()
}

const EBS_MARKERS: [&str; 7] = ["ebs", "gp2", "gp3", "io1", "io2", "st1", "sc1"];

fn is_ebs_class(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    EBS_MARKERS.iter().any(|m| name.contains(m))
}

/// Class for an EBS volume type: exact name, then `<type>-` prefix, then an
/// EBS class named default, then any EBS class.
pub fn find_matching_ebs_class(volume_type: &str, classes: &[TargetStorageClass]) -> Option<String> {
    let volume_type = volume_type.to_ascii_lowercase();
    let prefix = format!("{volume_type}-");
    let ebs: Vec<&TargetStorageClass> = classes.iter().filter(|c| is_ebs_class(&c.name)).collect();
    classes
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(&volume_type))
        .or_else(|| classes.iter().find(|c| c.name.to_ascii_lowercase().starts_with(&prefix)))
        .or_else(|| ebs.iter().copied().find(|c| c.name.to_ascii_lowercase().contains("default")))
        .or_else(|| ebs.first().copied())
        .map(|c| c.name.clone())
}

/// Throughput-optimized and magnetic volumes are filesystem backed.
pub fn ebs_volume_mode(volume_type: &str) -> VolumeMode {
    match volume_type.to_ascii_lowercase().as_str() {
        "st1" | "sc1" | "standard" => VolumeMode::Filesystem,
        _ => VolumeMode::Block,
    }
}

fn default_ec2_storage_pairs(
    sources: &[Storage],
    classes: &[TargetStorageClass],
    user_default: Option<&str>,
) -> Vec<StoragePair> {
    let user_default = user_default.map(str::trim).filter(|v| !v.is_empty());
    let fallback = classes.iter().find(|c| !c.name.is_empty()).map(|c| c.name.clone());
    sources
        .iter()
        .filter_map(|source| {
            let volume_type = source.type_.clone().unwrap_or_else(|| source.name.clone());
            let class = user_default
                .map(str::to_string)
                .or_else(|| find_matching_ebs_class(&volume_type, classes))
                .or_else(|| fallback.clone());
            let Some(class) = class else {
                warn!("No storage class for EBS volume type {}", volume_type);
                return None;
            };
            Some(StoragePair {
                source: SourceRef::by_name(volume_type.clone()),
                destination: DestinationStorage {
                    storage_class: class,
                    volume_mode: Some(ebs_volume_mode(&volume_type)),
                    access_mode: Some(AccessMode::ReadWriteOnce),
                },
                offload_plugin: None,
            })
        })
        .collect()
}

fn same_name_storages(sources: &[Storage], classes: &[TargetStorageClass]) -> Option<Vec<StoragePair>> {
    if sources.is_empty() {
        return None;
    }
    sources
        .iter()
        .map(|source| {
            classes.iter().find(|c| c.name == source.name).map(|c| StoragePair {
                source: SourceRef::by_name(source.name.clone()),
                destination: DestinationStorage {
                    storage_class: c.name.clone(),
                    ..Default::default()
                },
                offload_plugin: None,
            })
        })
        .collect()
}

/// Storage pairs for the plan's source storages.
pub fn default_storage_pairs(
    provider_type: ProviderType,
    sources: &[Storage],
    classes: &[TargetStorageClass],
    user_default: Option<&str>,
) -> Vec<StoragePair> {
    if provider_type == ProviderType::Ec2 {
        return default_ec2_storage_pairs(sources, classes, user_default);
    }
    if provider_type == ProviderType::Openshift && user_default.is_none() {
        if let Some(pairs) = same_name_storages(sources, classes) {
            debug!("Mapped {} storage class(es) by name", pairs.len());
            return pairs;
        }
    }
    let class = select_default_storage_class(classes, user_default);
    if class.is_empty() {
        warn!("No storage class available on the destination cluster");
    }
    sources
        .iter()
        .map(|source| StoragePair {
            source: storage_source_ref(provider_type, source),
            destination: DestinationStorage {
                storage_class: class.clone(),
                ..Default::default()
            },
            offload_plugin: None,
        })
        .collect()
}
