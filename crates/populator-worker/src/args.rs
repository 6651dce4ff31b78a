//! Command line
//!
//! The populator controller renders these flags into the worker pod. The
//! source kind follows from which identity flag is present. `--mode=sync`
//! is the warm-migration final pass over an already populated volume.

use crate::error::WorkerError;
use clap::{Parser, ValueEnum};
use crds::{PopulatorKind, StorageVendorProduct};
use std::path::PathBuf;

/// Default port of the progress endpoint
pub const DEFAULT_METRICS_PORT: u16 = 2112;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Full copy into a fresh volume
    Populate,
    /// Rewrite only the blocks that differ from the source
    Sync,
}

/// Volume populator worker
#[derive(Parser, Debug, Clone)]
#[command(name = "populator-worker")]
#[command(about = "Copy one source disk into a target volume", long_about = None)]
pub struct Args {
    #[arg(long, value_enum, default_value = "populate")]
    pub mode: Mode,

    /// Populator CR name
    #[arg(long)]
    pub cr_name: String,

    /// Populator CR namespace
    #[arg(long)]
    pub cr_namespace: String,

    /// Secret mounted into the environment
    #[arg(long)]
    pub secret_name: Option<String>,

    /// oVirt disk id
    #[arg(long)]
    pub disk_id: Option<String>,

    /// oVirt engine URL
    #[arg(long)]
    pub engine_url: Option<String>,

    /// Glance image id
    #[arg(long)]
    pub image_id: Option<String>,

    /// Keystone identity endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// `[datastore] path/disk.vmdk`
    #[arg(long)]
    pub source_vmdk: Option<String>,

    /// Source VM id (vSphere)
    #[arg(long)]
    pub vm_id: Option<String>,

    /// Array vendor for copy offload
    #[arg(long)]
    pub storage_vendor_product: Option<String>,

    /// Shadow PVC the worker writes into
    #[arg(long)]
    pub target_pvc: Option<String>,

    /// `/dev/block` for block volumes, `/mnt/disk.img` otherwise
    #[arg(long)]
    pub file_name: PathBuf,

    /// Requested size of the target volume in bytes
    #[arg(long)]
    pub pvc_size: Option<u64>,

    /// UID of the user PVC
    #[arg(long)]
    pub owner_uid: Option<String>,

    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,
}

/// Where the bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Ovirt {
        engine_url: String,
        disk_id: String,
    },
    Openstack {
        endpoint: String,
        image_id: String,
    },
    VsphereXcopy {
        source_vmdk: String,
        vm_id: Option<String>,
        /// Array vendor; `None` streams from the ESXi host
        vendor: Option<StorageVendorProduct>,
    },
}

impl Source {
    pub fn kind(&self) -> PopulatorKind {
        match self {
            Self::Ovirt { .. } => PopulatorKind::Ovirt,
            Self::Openstack { .. } => PopulatorKind::Openstack,
            Self::VsphereXcopy { .. } => PopulatorKind::VsphereXcopy,
        }
    }

    /// Value of the progress metric label
    pub fn id(&self) -> &str {
        match self {
            Self::Ovirt { disk_id, .. } => disk_id,
            Self::Openstack { image_id, .. } => image_id,
            Self::VsphereXcopy { source_vmdk, .. } => source_vmdk,
        }
    }
}

/// A validated populate run
#[derive(Debug, Clone)]
pub struct Job {
    pub mode: Mode,
    pub source: Source,
    pub target: PathBuf,
    pub target_pvc: String,
    pub cr_name: String,
    pub cr_namespace: String,
    pub pvc_size: Option<u64>,
    pub owner_uid: Option<String>,
    pub metrics_port: u16,
}

fn required(value: &Option<String>, flag: &str) -> Result<String, WorkerError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| WorkerError::InvalidArgs(format!("--{flag} is required")))
}

impl Args {
    /// Validate flags into a job.
    pub fn job(&self) -> Result<Job, WorkerError> {
        let source = match (&self.disk_id, &self.image_id, &self.source_vmdk) {
            (Some(_), None, None) => Source::Ovirt {
                engine_url: required(&self.engine_url, "engine-url")?,
                disk_id: required(&self.disk_id, "disk-id")?,
            },
            (None, Some(_), None) => Source::Openstack {
                endpoint: required(&self.endpoint, "endpoint")?,
                image_id: required(&self.image_id, "image-id")?,
            },
            (None, None, Some(_)) => Source::VsphereXcopy {
                source_vmdk: required(&self.source_vmdk, "source-vmdk")?,
                vm_id: self.vm_id.clone().filter(|v| !v.is_empty()),
                vendor: self
                    .storage_vendor_product
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::parse)
                    .transpose()
                    .map_err(WorkerError::InvalidArgs)?,
            },
            _ => {
                return Err(WorkerError::InvalidArgs(
                    "exactly one of --disk-id, --image-id or --source-vmdk is required".to_string(),
                ));
            }
        };
        if self.file_name.as_os_str().is_empty() {
            return Err(WorkerError::InvalidArgs("--file-name is required".to_string()));
        }
        Ok(Job {
            mode: self.mode,
            source,
            target: self.file_name.clone(),
            target_pvc: self.target_pvc.clone().unwrap_or_default(),
            cr_name: self.cr_name.clone(),
            cr_namespace: self.cr_namespace.clone(),
            pvc_size: self.pvc_size,
            owner_uid: self.owner_uid.clone(),
            metrics_port: self.metrics_port,
        })
    }
}
