//! Controller configuration from the environment

use crate::error::ControllerError;
use crds::PopulatorKind;
use std::collections::HashMap;
use std::time::Duration;

/// Default worker restart limit
pub const DEFAULT_RESTART_LIMIT: u32 = 3;

/// Default requeue interval while a migration is executing
pub const DEFAULT_REQUEUE_SECONDS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Inventory service base URL
    pub inventory_url: String,
    /// Bearer token for the inventory service
    pub inventory_token: Option<String>,
    pub restart_limit: u32,
    pub requeue: Duration,
    /// Guest conversion image
    pub virt_v2v_image: String,
    /// Worker images, used for the final sync of warm migrations
    pub ovirt_image: String,
    pub openstack_image: String,
    pub vsphere_xcopy_image: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            inventory_url: "https://forklift-inventory.konveyor-forklift.svc:8443".to_string(),
            inventory_token: None,
            restart_limit: DEFAULT_RESTART_LIMIT,
            requeue: Duration::from_secs(DEFAULT_REQUEUE_SECONDS),
            virt_v2v_image: "quay.io/kubev2v/forklift-virt-v2v:latest".to_string(),
            ovirt_image: "quay.io/kubev2v/ovirt-populator:latest".to_string(),
            openstack_image: "quay.io/kubev2v/openstack-populator:latest".to_string(),
            vsphere_xcopy_image: "quay.io/kubev2v/vsphere-xcopy-volume-populator:latest".to_string(),
        }
    }
}

impl Config {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ControllerError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let inventory_url = get("INVENTORY_URL").ok_or_else(|| {
            ControllerError::InvalidConfig("INVENTORY_URL environment variable is required".to_string())
        })?;
        let restart_limit = match get("RESTART_LIMIT") {
            Some(v) => v
                .parse()
                .map_err(|_| ControllerError::InvalidConfig(format!("RESTART_LIMIT must be an integer, got '{v}'")))?,
            None => defaults.restart_limit,
        };
        let requeue = match get("REQUEUE_SECONDS") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .map_err(|_| ControllerError::InvalidConfig(format!("REQUEUE_SECONDS must be an integer, got '{v}'")))?,
            ),
            None => defaults.requeue,
        };

        Ok(Self {
            namespace: get("WATCH_NAMESPACE"),
            inventory_url,
            inventory_token: get("INVENTORY_TOKEN"),
            restart_limit,
            requeue,
            virt_v2v_image: get("VIRT_V2V_IMAGE").unwrap_or(defaults.virt_v2v_image),
            ovirt_image: get("OVIRT_POPULATOR_IMAGE").unwrap_or(defaults.ovirt_image),
            openstack_image: get("OPENSTACK_POPULATOR_IMAGE").unwrap_or(defaults.openstack_image),
            vsphere_xcopy_image: get("VSPHERE_XCOPY_POPULATOR_IMAGE").unwrap_or(defaults.vsphere_xcopy_image),
        })
    }

    /// Worker image for a populator kind
    pub fn worker_image(&self, kind: PopulatorKind) -> &str {
        match kind {
            PopulatorKind::Ovirt => &self.ovirt_image,
            PopulatorKind::Openstack => &self.openstack_image,
            PopulatorKind::VsphereXcopy => &self.vsphere_xcopy_image,
        }
    }
}
