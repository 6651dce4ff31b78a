//! Objects created in the target namespace for one VM
//!
//! Populator requests and the user PVCs they fill, CDI DataVolumes, the
//! guest inspection, conversion and final-sync pods, the live handover
//! migrations and the KubeVirt VirtualMachine. Everything carries the
//! `migration`, `plan` and `vmID` labels; cleanup finds objects by label
//! because the Migration usually lives in another namespace and cannot own
//! them.

use crate::cluster::ExternalKind;
use crate::error::ControllerError;
use crds::{
    API_GROUP, API_VERSION, AccessMode, DestinationNetwork, MigrationType, NetworkPair, NetworkType,
    OpenstackVolumePopulatorSpec, OvirtVolumePopulatorSpec, PopulatorKind, PowerState, Provider, ProviderType,
    ResourceRef, StoragePair, VSphereXcopyVolumePopulatorSpec, VmStatus,
};
use inventory_client::{Disk, Vm};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec, SecretEnvSource, TypedObjectReference,
    Volume, VolumeDevice, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub const MIGRATION_LABEL: &str = "migration";
pub const PLAN_LABEL: &str = "plan";
pub const VM_ID_LABEL: &str = "vmID";

/// Source disk id a user PVC was created for
pub const DISK_SOURCE_ANNOTATION: &str = "forklift.konveyor.io/disk-source";

pub use crds::{POPULATE_TARGET_FINALIZER, RECREATIONS_ANNOTATION, SHADOW_PVC_PREFIX, WORKER_POD_PREFIX};

/// Multus annotation selecting the transfer network of a pod
pub const TRANSFER_NETWORK_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";

const MAX_NAME: usize = 63;
const DEVICE_PATH: &str = "/dev/block";
const MOUNT_PATH: &str = "/mnt/";
const FILESYSTEM_TARGET: &str = "/mnt/disk.img";
/// qemu uid/gid, owner of written images
const QEMU_USER: i64 = 107;

/// Lower-case DNS-1123 label derived from `raw`.
pub fn dns1123(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let mut out: String = out.trim_matches('-').chars().take(MAX_NAME).collect();
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() { "vm".to_string() } else { out }
}

/// How the disks of a VM reach the target namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPath {
    /// A volume populator streams each disk into its user PVC
    Populator(PopulatorKind),
    /// Empty DataVolumes, written by the guest conversion or the live handover
    Blank,
    /// DataVolumes cloned from the source claims of the same cluster
    Clone,
}

impl TransferPath {
    pub fn populator(self) -> Option<PopulatorKind> {
        match self {
            Self::Populator(kind) => Some(kind),
            Self::Blank | Self::Clone => None,
        }
    }
}

/// Transfer path for a migration type from `source`.
pub fn transfer_path(type_: MigrationType, source: ProviderType) -> TransferPath {
    match (type_, source) {
        (MigrationType::Live, _) => TransferPath::Blank,
        (_, ProviderType::Ovirt) => TransferPath::Populator(PopulatorKind::Ovirt),
        (_, ProviderType::Openstack) => TransferPath::Populator(PopulatorKind::Openstack),
        (_, ProviderType::Vsphere) => TransferPath::Populator(PopulatorKind::VsphereXcopy),
        (_, ProviderType::Ova | ProviderType::Ec2) => TransferPath::Blank,
        (_, ProviderType::Openshift) => TransferPath::Clone,
    }
}

/// Identity of the objects created for one VM of one migration
#[derive(Debug, Clone)]
pub struct VmScope {
    pub migration_uid: String,
    pub plan_uid: String,
    pub vm_id: String,
    pub vm_name: String,
    pub namespace: String,
}

impl VmScope {
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MIGRATION_LABEL.to_string(), self.migration_uid.clone()),
            (PLAN_LABEL.to_string(), self.plan_uid.clone()),
            (VM_ID_LABEL.to_string(), dns1123(&self.vm_id)),
        ])
    }

    /// Label selector matching this VM's objects
    pub fn selector(&self) -> String {
        format!("{}={},{}={}", MIGRATION_LABEL, self.migration_uid, VM_ID_LABEL, dns1123(&self.vm_id))
    }

    /// Name of the populator request or DataVolume for `disk`, and of the
    /// claim behind it
    pub fn volume_name(&self, disk: &Disk) -> String {
        dns1123(&format!("{}-{}", self.vm_name, disk.id))
    }

    /// `<vm>-<first 8 of migration uid>-<suffix>`, within the name limit
    fn suffixed(&self, suffix: &str) -> String {
        let uid: String = self.migration_uid.chars().filter(char::is_ascii_alphanumeric).take(8).collect();
        let base: String = dns1123(&self.vm_name).chars().take(MAX_NAME - 10 - suffix.len()).collect();
        format!("{}-{}-{}", base.trim_end_matches('-'), uid.to_lowercase(), suffix)
    }

    pub fn convert_pod_name(&self) -> String {
        self.suffixed("convert")
    }

    pub fn inspect_pod_name(&self) -> String {
        self.suffixed("inspect")
    }

    /// Final-sync pod of one claim
    pub fn sync_pod_name(&self, claim: &str) -> String {
        let base: String = dns1123(claim).chars().take(MAX_NAME - 5).collect();
        format!("{}-sync", base.trim_end_matches('-'))
    }

    pub fn receive_migration_name(&self) -> String {
        self.suffixed("receive")
    }

    pub fn send_migration_name(&self) -> String {
        self.suffixed("send")
    }

    /// Identity pairing the sending and receiving side of a live handover
    pub fn live_migration_id(&self) -> String {
        dns1123(&format!("{}-{}", self.migration_uid, self.vm_id))
    }

    pub fn target_vm_name(&self) -> String {
        dns1123(&self.vm_name)
    }

    fn meta(&self, name: String) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }
}

/// Credentials and transport settings shared by the disks of one VM
#[derive(Debug, Clone, Default)]
pub struct TransferSource {
    /// Secret in the target namespace mounted into the worker
    pub secret_name: String,
    /// Storage array for vSphere copy offload
    pub vendor: Option<String>,
    pub transfer_network: Option<ResourceRef>,
}

/// Spec of one populator request
#[derive(Debug, Clone)]
pub enum PopulatorSpec {
    Ovirt(OvirtVolumePopulatorSpec),
    Openstack(OpenstackVolumePopulatorSpec),
    VsphereXcopy(VSphereXcopyVolumePopulatorSpec),
}

impl PopulatorSpec {
    pub fn kind(&self) -> PopulatorKind {
        match self {
            Self::Ovirt(_) => PopulatorKind::Ovirt,
            Self::Openstack(_) => PopulatorKind::Openstack,
            Self::VsphereXcopy(_) => PopulatorKind::VsphereXcopy,
        }
    }

    /// Source flags of the worker reading this disk
    pub fn worker_args(&self) -> Vec<String> {
        match self {
            Self::Ovirt(spec) => spec.worker_args(),
            Self::Openstack(spec) => spec.worker_args(),
            Self::VsphereXcopy(spec) => spec.worker_args(),
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Ovirt(spec) => serde_json::to_value(spec),
            Self::Openstack(spec) => serde_json::to_value(spec),
            Self::VsphereXcopy(spec) => serde_json::to_value(spec),
        }
    }
}

/// Populator spec reading `disk` of `vm`.
pub fn populator_spec(
    kind: PopulatorKind,
    provider: &Provider,
    vm: &Vm,
    disk: &Disk,
    source: &TransferSource,
) -> Result<PopulatorSpec, ControllerError> {
    Ok(match kind {
        PopulatorKind::Ovirt => PopulatorSpec::Ovirt(OvirtVolumePopulatorSpec {
            engine_url: provider.spec.url.clone(),
            engine_secret_name: source.secret_name.clone(),
            disk_id: disk.id.clone(),
            transfer_network: source.transfer_network.clone(),
        }),
        PopulatorKind::Openstack => PopulatorSpec::Openstack(OpenstackVolumePopulatorSpec {
            identity_url: provider.spec.url.clone(),
            secret_name: source.secret_name.clone(),
            image_id: disk.id.clone(),
            transfer_network: source.transfer_network.clone(),
        }),
        PopulatorKind::VsphereXcopy => {
            let vmdk_path = disk.file.clone().ok_or_else(|| {
                ControllerError::Configuration(format!("disk {} of VM {} has no vmdk path", disk.id, vm.name))
            })?;
            PopulatorSpec::VsphereXcopy(VSphereXcopyVolumePopulatorSpec {
                vm_id: vm.id.clone(),
                vmdk_path,
                secret_name: source.secret_name.clone(),
                storage_vendor_product: source.vendor.clone().unwrap_or_default(),
            })
        }
    })
}

/// Populator request for one disk, as an unstructured object.
pub fn populator_object(scope: &VmScope, disk: &Disk, spec: &PopulatorSpec) -> Result<Value, ControllerError> {
    let meta = scope.meta(scope.volume_name(disk));
    Ok(json!({
        "apiVersion": format!("{API_GROUP}/{API_VERSION}"),
        "kind": spec.kind().kind(),
        "metadata": meta,
        "spec": spec.to_value()?,
    }))
}

/// Where a DataVolume gets its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataVolumeSource {
    Blank,
    Pvc { namespace: String, name: String },
}

/// CDI DataVolume for `disk`. Blank volumes need a size; clones take the
/// source claim's.
pub fn data_volume(
    scope: &VmScope,
    disk: &Disk,
    pair: &StoragePair,
    size: Option<String>,
    source: &DataVolumeSource,
) -> Result<Value, ControllerError> {
    let source = match source {
        DataVolumeSource::Blank => {
            if size.is_none() {
                return Err(ControllerError::Configuration(format!("disk {} reports no capacity", disk.id)));
            }
            json!({ "blank": {} })
        }
        DataVolumeSource::Pvc { namespace, name } => json!({ "pvc": { "namespace": namespace, "name": name } }),
    };
    let destination = &pair.destination;
    let mut storage = json!({ "storageClassName": destination.storage_class });
    if let Some(mode) = destination.access_mode {
        storage["accessModes"] = json!([mode.as_str()]);
    }
    if let Some(mode) = destination.volume_mode {
        storage["volumeMode"] = json!(mode.as_str());
    }
    if let Some(size) = size {
        storage["resources"] = json!({ "requests": { "storage": size } });
    }
    let mut meta = scope.meta(scope.volume_name(disk));
    meta.annotations = Some(BTreeMap::from([(DISK_SOURCE_ANNOTATION.to_string(), disk.id.clone())]));
    Ok(json!({
        "apiVersion": ExternalKind::DataVolume.api_version(),
        "kind": ExternalKind::DataVolume.kind(),
        "metadata": meta,
        "spec": { "source": source, "storage": storage },
    }))
}

/// User PVC for `disk`, filled by the populator request named `populator`.
pub fn user_pvc(
    scope: &VmScope,
    kind: PopulatorKind,
    populator: &str,
    disk: &Disk,
    pair: &StoragePair,
    generate_name: bool,
) -> Result<PersistentVolumeClaim, ControllerError> {
    if disk.capacity <= 0 {
        return Err(ControllerError::Configuration(format!("disk {} reports no capacity", disk.id)));
    }
    let mut metadata = scope.meta(populator.to_string());
    if generate_name {
        metadata.name = None;
        metadata.generate_name = Some(format!("{}-", dns1123(&scope.vm_name)));
    }
    metadata.annotations = Some(BTreeMap::from([(DISK_SOURCE_ANNOTATION.to_string(), disk.id.clone())]));

    let destination = &pair.destination;
    let access_mode = destination.access_mode.unwrap_or(AccessMode::ReadWriteOnce);
    Ok(PersistentVolumeClaim {
        metadata,
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![access_mode.as_str().to_string()]),
            volume_mode: destination.volume_mode.map(|m| m.as_str().to_string()),
            storage_class_name: Some(destination.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(disk.capacity.to_string()))])),
                ..Default::default()
            }),
            data_source_ref: Some(TypedObjectReference {
                api_group: Some(API_GROUP.to_string()),
                kind: kind.kind().to_string(),
                name: populator.to_string(),
                namespace: None,
            }),
            ..Default::default()
        }),
        status: None,
    })
}

fn is_block(pvc: &PersistentVolumeClaim) -> bool {
    pvc.spec.as_ref().and_then(|s| s.volume_mode.as_deref()) == Some("Block")
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn secret_env(secret: &str) -> EnvFromSource {
    EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: secret.to_string(),
            optional: None,
        }),
        ..Default::default()
    }
}

/// Manually configured guest addresses as
/// `<mac>:ip:<ip>,<gateway>,<prefix>,<dns>[,<dns>...]`, joined by `_`.
pub fn static_ips(vm: &Vm) -> Option<String> {
    let entries: Vec<String> = vm
        .guest_networks
        .iter()
        .filter(|g| g.is_static && !g.ip.is_empty())
        .map(|g| {
            let mut entry = format!(
                "{}:ip:{},{},{}",
                g.mac,
                g.ip,
                g.gateway.as_deref().unwrap_or_default(),
                g.prefix_length
            );
            for dns in &g.dns {
                entry.push(',');
                entry.push_str(dns);
            }
            entry
        })
        .collect();
    (!entries.is_empty()).then(|| entries.join("_"))
}

/// Settings the conversion pod takes beyond the VM's claims
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionOptions {
    pub preserve_static_ips: bool,
    pub static_ips: Option<String>,
    /// Disk locations the conversion reads itself, in claim order
    pub disk_sources: Vec<String>,
    pub source_url: Option<String>,
    /// Credentials secret exposed as environment
    pub secret_name: Option<String>,
}

/// Guest conversion pod over the VM's claims.
pub fn convert_pod(
    scope: &VmScope,
    image: &str,
    source: ProviderType,
    claims: &[PersistentVolumeClaim],
    options: &ConversionOptions,
) -> Pod {
    let mut volumes = Vec::with_capacity(claims.len());
    let mut mounts = Vec::new();
    let mut devices = Vec::new();
    for (i, claim) in claims.iter().enumerate() {
        let volume = format!("disk{i}");
        volumes.push(Volume {
            name: volume.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.metadata.name.clone().unwrap_or_default(),
                read_only: None,
            }),
            ..Default::default()
        });
        if is_block(claim) {
            devices.push(VolumeDevice {
                name: volume,
                device_path: format!("/dev/block{i}"),
            });
        } else {
            mounts.push(VolumeMount {
                name: volume,
                mount_path: format!("/mnt/disks/disk{i}"),
                ..Default::default()
            });
        }
    }
    let mut vars = vec![env("V2V_vmName", &scope.vm_name), env("V2V_source", source.as_str())];
    if options.preserve_static_ips {
        vars.push(env("V2V_preserveStaticIPs", "true"));
        if let Some(ips) = &options.static_ips {
            vars.push(env("V2V_staticIPs", ips));
        }
    }
    if !options.disk_sources.is_empty() {
        vars.push(env("V2V_diskSources", &options.disk_sources.join(",")));
    }
    if let Some(url) = &options.source_url {
        vars.push(env("V2V_sourceURL", url));
    }
    Pod {
        metadata: scope.meta(scope.convert_pod_name()),
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "virt-v2v".to_string(),
                image: Some(image.to_string()),
                env: Some(vars),
                env_from: options.secret_name.as_deref().map(|s| vec![secret_env(s)]),
                volume_mounts: Some(mounts).filter(|m| !m.is_empty()),
                volume_devices: Some(devices).filter(|d| !d.is_empty()),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        }),
        status: None,
    }
}

/// Guest inspection run before anything is transferred.
pub fn inspection_pod(scope: &VmScope, image: &str, source: ProviderType, vm: &Vm, secret_name: Option<&str>) -> Pod {
    let disks: Vec<String> = vm
        .disks
        .iter()
        .map(|d| d.file.clone().unwrap_or_else(|| d.id.clone()))
        .collect();
    Pod {
        metadata: scope.meta(scope.inspect_pod_name()),
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "virt-v2v-inspector".to_string(),
                image: Some(image.to_string()),
                env: Some(vec![
                    env("V2V_inspector", "true"),
                    env("V2V_vmName", &scope.vm_name),
                    env("V2V_source", source.as_str()),
                    env("V2V_diskSources", &disks.join(",")),
                ]),
                env_from: secret_name.map(|s| vec![secret_env(s)]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

fn claim_bytes(claim: &PersistentVolumeClaim) -> Option<u64> {
    claim
        .spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")?
        .0
        .trim()
        .parse()
        .ok()
}

/// Worker pod running the final sync of one populated claim. The worker
/// writes into the bound claim in place.
pub fn sync_pod(
    scope: &VmScope,
    image: &str,
    spec: &PopulatorSpec,
    claim: &PersistentVolumeClaim,
    source: &TransferSource,
) -> Pod {
    let claim_name = claim.metadata.name.clone().unwrap_or_default();
    let uid = claim.metadata.uid.clone().unwrap_or_default();
    let block = is_block(claim);
    let mut args = vec![
        "--mode=sync".to_string(),
        format!("--file-name={}", if block { DEVICE_PATH } else { FILESYSTEM_TARGET }),
        format!("--cr-name={claim_name}"),
        format!("--cr-namespace={}", scope.namespace),
    ];
    args.extend(spec.worker_args());
    if let Some(bytes) = claim_bytes(claim) {
        args.push(format!("--pvc-size={bytes}"));
    }
    args.push(format!("--owner-uid={uid}"));

    let volume = "target".to_string();
    let (volume_mounts, volume_devices) = if block {
        let device = VolumeDevice {
            name: volume.clone(),
            device_path: DEVICE_PATH.to_string(),
        };
        (None, Some(vec![device]))
    } else {
        let mount = VolumeMount {
            name: volume.clone(),
            mount_path: MOUNT_PATH.to_string(),
            ..Default::default()
        };
        (Some(vec![mount]), None)
    };
    let mut metadata = scope.meta(scope.sync_pod_name(&claim_name));
    metadata.annotations = source.transfer_network.as_ref().map(|n| {
        let network = format!("{}/{}", n.namespace_or(&scope.namespace), n.name);
        BTreeMap::from([(TRANSFER_NETWORK_ANNOTATION.to_string(), network)])
    });
    Pod {
        metadata,
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "sync".to_string(),
                image: Some(image.to_string()),
                args: Some(args),
                env_from: Some(vec![secret_env(&source.secret_name)]),
                volume_mounts,
                volume_devices,
                ..Default::default()
            }],
            security_context: Some(PodSecurityContext {
                fs_group: Some(QEMU_USER),
                run_as_user: Some(QEMU_USER),
                ..Default::default()
            }),
            volumes: Some(vec![Volume {
                name: volume,
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name,
                    read_only: None,
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Receiving side of a live handover, next to the target VM.
pub fn receive_migration(scope: &VmScope) -> Value {
    json!({
        "apiVersion": ExternalKind::VirtualMachineInstanceMigration.api_version(),
        "kind": ExternalKind::VirtualMachineInstanceMigration.kind(),
        "metadata": scope.meta(scope.receive_migration_name()),
        "spec": {
            "vmiName": scope.target_vm_name(),
            "receive": { "migrationID": scope.live_migration_id() },
        },
    })
}

/// Sending side of a live handover, next to the source VM.
pub fn send_migration(scope: &VmScope, source_namespace: &str, source_vm: &str, connect_url: &str) -> Value {
    let mut meta = scope.meta(scope.send_migration_name());
    meta.namespace = Some(source_namespace.to_string());
    json!({
        "apiVersion": ExternalKind::VirtualMachineInstanceMigration.api_version(),
        "kind": ExternalKind::VirtualMachineInstanceMigration.kind(),
        "metadata": meta,
        "spec": {
            "vmiName": source_vm,
            "sendTo": { "migrationID": scope.live_migration_id(), "connectURL": connect_url },
        },
    })
}

/// How the target VM is shaped beyond what the source reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetOptions {
    /// SATA disks and e1000e NICs for guests without virtio drivers
    pub compatibility_mode: bool,
    /// Start waiting for a live handover instead of booting
    pub receiver: bool,
}

fn destination_for<'a>(pairs: &'a [NetworkPair], network: &str, network_name: Option<&str>) -> Option<&'a DestinationNetwork> {
    pairs
        .iter()
        .find(|p| {
            p.source.id.as_deref() == Some(network)
                || (network_name.is_some() && p.source.name.as_deref() == network_name)
        })
        .map(|p| &p.destination)
}

/// KubeVirt VirtualMachine for a migrated VM.
///
/// `network_names` maps inventory network ids to names so pairs written by
/// name still match.
pub fn virtual_machine(
    scope: &VmScope,
    vm: &Vm,
    status: &VmStatus,
    claims: &[PersistentVolumeClaim],
    pairs: &[NetworkPair],
    network_names: &BTreeMap<String, String>,
    options: TargetOptions,
) -> Result<Value, ControllerError> {
    let (bus, model) = if options.compatibility_mode {
        ("sata", "e1000e")
    } else {
        ("virtio", "virtio")
    };
    let mut disks = Vec::with_capacity(claims.len());
    let mut volumes = Vec::with_capacity(claims.len());
    for (i, claim) in claims.iter().enumerate() {
        let name = format!("vol-{i}");
        disks.push(json!({ "name": name, "disk": { "bus": bus } }));
        volumes.push(json!({
            "name": name,
            "persistentVolumeClaim": { "claimName": claim.metadata.name.clone().unwrap_or_default() },
        }));
    }

    let mut interfaces = Vec::new();
    let mut networks = Vec::new();
    for (i, nic) in vm.nics.iter().enumerate() {
        let destination = destination_for(pairs, &nic.network, network_names.get(&nic.network).map(String::as_str))
            .ok_or_else(|| {
                ControllerError::Configuration(format!("network {} of VM {} is not mapped", nic.network, vm.name))
            })?;
        let name = format!("net-{i}");
        let (binding, network) = match destination.type_ {
            NetworkType::Ignored => continue,
            NetworkType::Pod => ("masquerade", json!({ "name": name, "pod": {} })),
            NetworkType::Multus => {
                let nad = format!(
                    "{}/{}",
                    destination.namespace.as_deref().unwrap_or(&scope.namespace),
                    destination.name.as_deref().unwrap_or_default()
                );
                ("bridge", json!({ "name": name, "multus": { "networkName": nad } }))
            }
        };
        let mut interface = json!({ "name": name, "model": model });
        interface[binding] = json!({});
        if let Some(mac) = &nic.mac {
            interface["macAddress"] = json!(mac);
        }
        interfaces.push(interface);
        networks.push(network);
    }

    let run_strategy = match status.restore_power_state {
        _ if options.receiver => "WaitAsReceiver",
        Some(PowerState::On) => "Always",
        _ => "Halted",
    };
    Ok(json!({
        "apiVersion": "kubevirt.io/v1",
        "kind": "VirtualMachine",
        "metadata": scope.meta(scope.target_vm_name()),
        "spec": {
            "runStrategy": run_strategy,
            "template": {
                "metadata": { "labels": scope.labels() },
                "spec": {
                    "domain": {
                        "devices": { "disks": disks, "interfaces": interfaces },
                        "resources": { "requests": { "memory": "1Gi" } },
                    },
                    "networks": networks,
                    "volumes": volumes,
                },
            },
        },
    }))
}
