//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use crate::config::Config;
#[cfg(test)]
use crate::mock::{MockCluster, RecordingPower, StaticAdapters};
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crds::condition::{Condition, condition_type};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use inventory_client::{Disk, MockSourceAdapter, Network, Nic, Storage, Vm};
#[cfg(test)]
use k8s_openapi::ByteString;
#[cfg(test)]
use k8s_openapi::api::core::v1::Secret;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
fn meta(name: &str, namespace: &str, uid: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(uid.to_string()),
        generation: Some(1),
        ..Default::default()
    }
}

/// Helper to create a test Provider with a credential secret named `<name>-secret`
#[cfg(test)]
pub fn provider(name: &str, namespace: &str, type_: ProviderType) -> Provider {
    Provider {
        metadata: meta(name, namespace, &format!("{name}-uid")),
        spec: ProviderSpec {
            type_,
            url: format!("https://{name}.example.com/sdk"),
            secret: Some(ResourceRef::with_namespace(format!("{name}-secret"), namespace)),
            settings: BTreeMap::new(),
        },
        status: None,
    }
}

/// Provider with `Ready=True`
#[cfg(test)]
pub fn ready_provider(name: &str, namespace: &str, type_: ProviderType) -> Provider {
    let mut provider = provider(name, namespace, type_);
    provider.status = Some(ProviderStatus {
        conditions: vec![Condition::truthy(condition_type::READY, "Ready", "")],
        observed_generation: Some(1),
    });
    provider
}

/// Local destination cluster
#[cfg(test)]
pub fn host_provider(namespace: &str) -> Provider {
    let mut provider = ready_provider("host", namespace, ProviderType::Openshift);
    provider.spec.url = String::new();
    provider.spec.secret = None;
    provider
}

#[cfg(test)]
pub fn secret(name: &str, namespace: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Helper to create a test Plan migrating `vm_ids` from provider `vcenter` to `host`
#[cfg(test)]
pub fn plan(name: &str, namespace: &str, vm_ids: &[&str]) -> Plan {
    Plan {
        metadata: meta(name, namespace, &format!("{name}-uid")),
        spec: PlanSpec {
            provider: ProviderPair {
                source: ResourceRef::new("vcenter"),
                destination: ResourceRef::new("host"),
            },
            map: PlanMaps::default(),
            target_namespace: "target".to_string(),
            vms: vm_ids
                .iter()
                .map(|id| PlanVm {
                    id: Some(id.to_string()),
                    ..Default::default()
                })
                .collect(),
            type_: MigrationType::Cold,
            transfer_network: None,
            preserve_static_ips: false,
            migrate_shared_disks: false,
            run_preflight_inspection: false,
            compatibility_mode: false,
            pvc_name_template_use_generate_name: false,
        },
        status: None,
    }
}

#[cfg(test)]
pub fn migration(name: &str, namespace: &str, plan: &str) -> Migration {
    Migration {
        metadata: meta(name, namespace, &format!("{name}-uid")),
        spec: MigrationSpec {
            plan: ResourceRef::new(plan),
            cutover: None,
            cancel: Vec::new(),
        },
        status: None,
    }
}

#[cfg(test)]
pub fn host(name: &str, namespace: &str, provider: &str, id: &str, ip: &str) -> Host {
    Host {
        metadata: meta(name, namespace, &format!("{name}-uid")),
        spec: HostSpec {
            provider: ResourceRef::new(provider),
            id: id.to_string(),
            name: None,
            ip_address: ip.to_string(),
            secret: None,
        },
        status: None,
    }
}

/// Inventory VM with one disk per `(id, capacity, storage)` and one NIC per network id
#[cfg(test)]
pub fn vm(id: &str, name: &str, disks: &[(&str, i64, &str)], networks: &[&str]) -> Vm {
    Vm {
        id: id.to_string(),
        name: name.to_string(),
        disks: disks
            .iter()
            .map(|(disk, capacity, storage)| Disk {
                id: disk.to_string(),
                capacity: *capacity,
                storage: Some(storage.to_string()),
                file: Some(format!("[{storage}] {name}/{disk}.vmdk")),
                ..Default::default()
            })
            .collect(),
        nics: networks
            .iter()
            .map(|network| Nic {
                network: network.to_string(),
                ..Default::default()
            })
            .collect(),
        power_state: Some("poweredOn".to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
pub fn network(id: &str, name: &str) -> Network {
    Network {
        id: id.to_string(),
        name: name.to_string(),
        namespace: None,
    }
}

#[cfg(test)]
pub fn storage(id: &str, name: &str) -> Storage {
    Storage {
        id: id.to_string(),
        name: name.to_string(),
        type_: None,
    }
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        inventory_url: "https://inventory.test".to_string(),
        ..Default::default()
    }
}

/// Reconciler over a fresh mock cluster and inventory
#[cfg(test)]
pub fn test_reconciler(type_: ProviderType) -> (Reconciler, MockCluster, MockSourceAdapter) {
    let cluster = MockCluster::new();
    let adapter = MockSourceAdapter::new(type_);
    let reconciler = reconciler_with(&cluster, &adapter, RecordingPower::default());
    (reconciler, cluster, adapter)
}

#[cfg(test)]
pub fn reconciler_with(cluster: &MockCluster, adapter: &MockSourceAdapter, power: RecordingPower) -> Reconciler {
    Reconciler::new(
        Arc::new(cluster.clone()),
        Arc::new(StaticAdapters::new(adapter.clone())),
        Arc::new(power),
        test_config(),
    )
}
