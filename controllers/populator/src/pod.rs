//! Worker pod and shadow PVC for one population
//!
//! The worker writes into a shadow PVC (`prime-<uid>`) cloned from the user
//! PVC. Once the worker succeeds the shadow's volume is handed over to the
//! user PVC.

use crate::config::Config;
use crate::error::PopulatorError;
use crds::{
    OpenstackVolumePopulatorSpec, OvirtVolumePopulatorSpec, PopulatorKind, SHADOW_PVC_PREFIX,
    VSphereXcopyVolumePopulatorSpec, WORKER_POD_PREFIX,
};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvFromSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec, SeccompProfile, SecretEnvSource,
    SecurityContext, Volume, VolumeDevice, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

pub const WORKER_CONTAINER: &str = "populate";
const TARGET_VOLUME: &str = "target";
const MOUNT_PATH: &str = "/mnt/";
const DEVICE_PATH: &str = "/dev/block";
const FILESYSTEM_TARGET: &str = "/mnt/disk.img";
/// qemu uid/gid, owner of the written image
const QEMU_USER: i64 = 107;
const XCOPY_SERVICE_ACCOUNT: &str = "populator";

pub const SELECTED_NODE_ANNOTATION: &str = "volume.kubernetes.io/selected-node";
pub const TRANSFER_NETWORK_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
const PVC_NAME_LABEL: &str = "pvcName";
const MIGRATION_LABEL: &str = "migration";

pub fn worker_pod_name(uid: &str) -> String {
    format!("{WORKER_POD_PREFIX}{uid}")
}

pub fn shadow_pvc_name(uid: &str) -> String {
    format!("{SHADOW_PVC_PREFIX}{uid}")
}

/// A populator request resolved into what the worker needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulatorSource {
    pub kind: PopulatorKind,
    pub name: String,
    pub namespace: String,
    /// Secret exposed to the worker as environment
    pub secret_name: String,
    /// Identity the worker reports progress under
    pub source_id: String,
    /// `<namespace>/<name>` of the transfer NetworkAttachmentDefinition
    pub transfer_network: Option<String>,
    pub migration: Option<String>,
    args: Vec<String>,
}

fn spec_of<T: DeserializeOwned>(kind: PopulatorKind, name: &str, object: &Value) -> Result<T, PopulatorError> {
    serde_json::from_value(object["spec"].clone())
        .map_err(|e| PopulatorError::SourceUnresolvable(format!("{kind} {name} has an invalid spec: {e}")))
}

impl PopulatorSource {
    /// Resolve a populator request read through the dynamic API.
    pub fn from_object(kind: PopulatorKind, object: &Value) -> Result<Self, PopulatorError> {
        let metadata: ObjectMeta = serde_json::from_value(object["metadata"].clone())?;
        let name = metadata.name.unwrap_or_default();
        let namespace = metadata.namespace.unwrap_or_default();
        let migration = metadata.labels.and_then(|mut l| l.remove(MIGRATION_LABEL));
        let network = |r: Option<crds::ResourceRef>| {
            r.map(|r| format!("{}/{}", r.namespace.unwrap_or_else(|| namespace.clone()), r.name))
        };

        let (secret_name, source_id, transfer_network, args) = match kind {
            PopulatorKind::Ovirt => {
                let spec: OvirtVolumePopulatorSpec = spec_of(kind, &name, object)?;
                let args = spec.worker_args();
                (spec.engine_secret_name, spec.disk_id, network(spec.transfer_network), args)
            }
            PopulatorKind::Openstack => {
                let spec: OpenstackVolumePopulatorSpec = spec_of(kind, &name, object)?;
                let args = spec.worker_args();
                (spec.secret_name, spec.image_id, network(spec.transfer_network), args)
            }
            PopulatorKind::VsphereXcopy => {
                let spec: VSphereXcopyVolumePopulatorSpec = spec_of(kind, &name, object)?;
                let args = spec.worker_args();
                (spec.secret_name, spec.vmdk_path, None, args)
            }
        };

        if source_id.is_empty() || secret_name.is_empty() {
            return Err(PopulatorError::SourceUnresolvable(format!(
                "{kind} {namespace}/{name} names no source or secret"
            )));
        }
        Ok(Self {
            kind,
            name,
            namespace,
            secret_name,
            source_id,
            transfer_network,
            migration,
            args,
        })
    }
}

/// Bytes in a storage quantity such as `10Gi` or `1073741824`.
pub fn quantity_bytes(quantity: &str) -> Option<u64> {
    const SUFFIXES: [(&str, u64); 10] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
    ];
    let quantity = quantity.trim();
    let (digits, factor) = SUFFIXES
        .iter()
        .find_map(|(suffix, factor)| quantity.strip_suffix(suffix).map(|d| (d, *factor)))
        .unwrap_or((quantity, 1));
    digits.parse::<u64>().ok()?.checked_mul(factor)
}

fn requested_bytes(spec: &PersistentVolumeClaimSpec) -> u64 {
    spec.resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .and_then(|q| quantity_bytes(&q.0))
        .unwrap_or(0)
}

fn is_block(spec: &PersistentVolumeClaimSpec) -> bool {
    spec.volume_mode.as_deref() == Some("Block")
}

/// Command line of the worker filling `pvc`.
pub fn worker_args(source: &PopulatorSource, pvc: &PersistentVolumeClaim) -> Vec<String> {
    let spec = pvc.spec.clone().unwrap_or_default();
    let uid = pvc.metadata.uid.as_deref().unwrap_or_default();
    let target = if is_block(&spec) { DEVICE_PATH } else { FILESYSTEM_TARGET };

    let mut args = vec![
        "--mode=populate".to_string(),
        format!("--file-name={target}"),
        format!("--cr-name={}", source.name),
        format!("--cr-namespace={}", source.namespace),
    ];
    args.extend(source.args.iter().cloned());
    if source.kind == PopulatorKind::VsphereXcopy {
        args.push(format!("--target-pvc={}", shadow_pvc_name(uid)));
    }
    args.push(format!("--pvc-size={}", requested_bytes(&spec)));
    args.push(format!("--owner-uid={uid}"));
    args
}

/// Worker pod for `pvc`, pinned to `node` when the class binds late.
pub fn worker_pod(source: &PopulatorSource, pvc: &PersistentVolumeClaim, config: &Config, node: Option<&str>) -> Pod {
    let spec = pvc.spec.clone().unwrap_or_default();
    let uid = pvc.metadata.uid.as_deref().unwrap_or_default();
    let pvc_name = pvc.metadata.name.clone().unwrap_or_default();

    let mut labels = BTreeMap::from([(PVC_NAME_LABEL.to_string(), pvc_name)]);
    if let Some(migration) = &source.migration {
        labels.insert(MIGRATION_LABEL.to_string(), migration.clone());
    }
    let annotations = source
        .transfer_network
        .as_ref()
        .map(|n| BTreeMap::from([(TRANSFER_NETWORK_ANNOTATION.to_string(), n.clone())]));

    let (volume_mounts, volume_devices) = if is_block(&spec) {
        let device = VolumeDevice {
            name: TARGET_VOLUME.to_string(),
            device_path: DEVICE_PATH.to_string(),
        };
        (None, Some(vec![device]))
    } else {
        let mount = VolumeMount {
            name: TARGET_VOLUME.to_string(),
            mount_path: MOUNT_PATH.to_string(),
            ..Default::default()
        };
        (Some(vec![mount]), None)
    };

    let container = Container {
        name: WORKER_CONTAINER.to_string(),
        image: Some(config.image(source.kind).to_string()),
        args: Some(worker_args(source, pvc)),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".to_string()),
            container_port: config.metrics_port,
            ..Default::default()
        }]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: source.secret_name.clone(),
                optional: None,
            }),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            run_as_user: Some(QEMU_USER),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                add: None,
            }),
            ..Default::default()
        }),
        volume_mounts,
        volume_devices,
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(worker_pod_name(uid)),
            namespace: pvc.metadata.namespace.clone(),
            labels: Some(labels),
            annotations,
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            node_name: node.map(str::to_string),
            service_account_name: (source.kind == PopulatorKind::VsphereXcopy)
                .then(|| XCOPY_SERVICE_ACCOUNT.to_string()),
            security_context: Some(PodSecurityContext {
                fs_group: Some(QEMU_USER),
                seccomp_profile: Some(SeccompProfile {
                    type_: "RuntimeDefault".to_string(),
                    localhost_profile: None,
                }),
                ..Default::default()
            }),
            volumes: Some(vec![Volume {
                name: TARGET_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: shadow_pvc_name(uid),
                    read_only: None,
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Shadow PVC the worker writes into, shaped like `pvc` minus its data source.
pub fn shadow_pvc(pvc: &PersistentVolumeClaim, node: Option<&str>) -> PersistentVolumeClaim {
    let spec = pvc.spec.clone().unwrap_or_default();
    let uid = pvc.metadata.uid.as_deref().unwrap_or_default();
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(shadow_pvc_name(uid)),
            namespace: pvc.metadata.namespace.clone(),
            annotations: node.map(|n| BTreeMap::from([(SELECTED_NODE_ANNOTATION.to_string(), n.to_string())])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: spec.access_modes,
            resources: spec.resources,
            storage_class_name: spec.storage_class_name,
            volume_mode: spec.volume_mode,
            ..Default::default()
        }),
        status: None,
    }
}
