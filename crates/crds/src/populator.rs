//! Volume populator CRDs
//!
//! A user PVC whose `dataSourceRef` names one of these resources is filled by
//! the volume populator controller. The controller writes transfer progress
//! back into `status.progress`.

use crate::references::ResourceRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Worker recreation counter kept on the user PVC
pub const RECREATIONS_ANNOTATION: &str = "recreations";

/// Finalizer the volume populator holds on user PVCs while filling them
pub const POPULATE_TARGET_FINALIZER: &str = "forklift.konveyor.io/populate-target-protection";

/// Set on a rebound PV, value `<namespace>/<populator name>`
pub const POPULATED_FROM_ANNOTATION: &str = "forklift.konveyor.io/populated-from";

/// Name prefixes derived from the user PVC UID
pub const SHADOW_PVC_PREFIX: &str = "prime-";
pub const WORKER_POD_PREFIX: &str = "populate-";

/// oVirt disk transferred through imageio
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "OvirtVolumePopulator",
    namespaced,
    status = "PopulatorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct OvirtVolumePopulatorSpec {
    /// oVirt engine API URL
    pub engine_url: String,

    /// Secret holding `user`, `password` and `cacert`
    pub engine_secret_name: String,

    /// Disk to transfer
    pub disk_id: String,

    /// NetworkAttachmentDefinition used for the transfer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_network: Option<ResourceRef>,
}

/// OpenStack image downloaded through glance
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "OpenstackVolumePopulator",
    namespaced,
    status = "PopulatorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct OpenstackVolumePopulatorSpec {
    /// Keystone identity URL
    pub identity_url: String,

    pub secret_name: String,

    /// Image to download
    pub image_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_network: Option<ResourceRef>,
}

/// vSphere disk copied by the storage array
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "VSphereXcopyVolumePopulator",
    namespaced,
    status = "PopulatorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereXcopyVolumePopulatorSpec {
    /// Source VM moref
    #[serde(default)]
    pub vm_id: String,

    /// `[datastore] folder/disk.vmdk`
    pub vmdk_path: String,

    /// Secret combining vSphere and storage-array credentials
    pub secret_name: String,

    pub storage_vendor_product: String,
}

impl OvirtVolumePopulatorSpec {
    /// Source flags of the worker reading this disk
    pub fn worker_args(&self) -> Vec<String> {
        vec![
            format!("--engine-url={}", self.engine_url),
            format!("--disk-id={}", self.disk_id),
            format!("--secret-name={}", self.engine_secret_name),
        ]
    }
}

impl OpenstackVolumePopulatorSpec {
    pub fn worker_args(&self) -> Vec<String> {
        vec![
            format!("--endpoint={}", self.identity_url),
            format!("--image-id={}", self.image_id),
            format!("--secret-name={}", self.secret_name),
        ]
    }
}

impl VSphereXcopyVolumePopulatorSpec {
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--source-vmdk={}", self.vmdk_path),
            format!("--secret-name={}", self.secret_name),
        ];
        if !self.vm_id.is_empty() {
            args.push(format!("--vm-id={}", self.vm_id));
        }
        if !self.storage_vendor_product.is_empty() {
            args.push(format!("--storage-vendor-product={}", self.storage_vendor_product));
        }
        args
    }
}

/// The populator CR kinds a PVC `dataSourceRef` may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PopulatorKind {
    Ovirt,
    Openstack,
    VsphereXcopy,
}

impl PopulatorKind {
    pub const ALL: [PopulatorKind; 3] = [Self::Ovirt, Self::Openstack, Self::VsphereXcopy];

    pub fn kind(self) -> &'static str {
        match self {
            Self::Ovirt => "OvirtVolumePopulator",
            Self::Openstack => "OpenstackVolumePopulator",
            Self::VsphereXcopy => "VSphereXcopyVolumePopulator",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            Self::Ovirt => "ovirtvolumepopulators",
            Self::Openstack => "openstackvolumepopulators",
            Self::VsphereXcopy => "vspherexcopyvolumepopulators",
        }
    }

    /// Metric name suffix under `volume_populators_`
    pub fn metric_tag(self) -> &'static str {
        match self {
            Self::Ovirt => "ovirt_volume_populator",
            Self::Openstack => "openstack_volume_populator",
            Self::VsphereXcopy => "vsphere_xcopy_volume_populator",
        }
    }

    /// Label carrying the source disk identity
    pub fn metric_key(self) -> &'static str {
        match self {
            Self::Ovirt => "disk_id",
            Self::Openstack => "image_id",
            Self::VsphereXcopy => "source_vmdk",
        }
    }

    /// Full progress metric name
    pub fn metric_name(self) -> String {
        format!("volume_populators_{}", self.metric_tag())
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.kind() == kind)
    }
}

impl std::fmt::Display for PopulatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PopulatorStatus {
    /// Percent written, as reported by the worker
    #[serde(default)]
    pub progress: String,
}

impl PopulatorStatus {
    /// Parsed progress, 0 when unset or malformed
    pub fn percent(&self) -> u8 {
        self.progress
            .trim()
            .parse::<f64>()
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(0)
    }
}
