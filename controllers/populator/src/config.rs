//! Controller configuration from the environment

use crate::error::PopulatorError;
use crds::PopulatorKind;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_RESTART_LIMIT: u32 = 3;
pub const DEFAULT_PROGRESS_INTERVAL_SECONDS: u64 = 5;
/// Port the worker serves `/metrics` on
pub const DEFAULT_METRICS_PORT: i32 = 2112;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Worker pods recreated at most this many times per PVC
    pub restart_limit: u32,
    /// Requeue interval while a population is in flight
    pub progress_interval: Duration,
    pub metrics_port: i32,
    pub ovirt_image: String,
    pub openstack_image: String,
    pub vsphere_xcopy_image: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            restart_limit: DEFAULT_RESTART_LIMIT,
            progress_interval: Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECONDS),
            metrics_port: DEFAULT_METRICS_PORT,
            ovirt_image: "quay.io/kubev2v/ovirt-populator:latest".to_string(),
            openstack_image: "quay.io/kubev2v/openstack-populator:latest".to_string(),
            vsphere_xcopy_image: "quay.io/kubev2v/vsphere-xcopy-volume-populator:latest".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, PopulatorError> {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, PopulatorError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str| -> Result<Option<u64>, PopulatorError> {
            get(key)
                .map(|v| {
                    v.parse()
                        .map_err(|_| PopulatorError::InvalidConfig(format!("{key} must be an integer, got '{v}'")))
                })
                .transpose()
        };
        let defaults = Self::default();

        let restart_limit = match number("RESTART_LIMIT")? {
            Some(v) => u32::try_from(v).map_err(|_| PopulatorError::InvalidConfig(format!("RESTART_LIMIT {v} is too large")))?,
            None => defaults.restart_limit,
        };
        let progress_interval = number("PROGRESS_INTERVAL_SECONDS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.progress_interval);

        Ok(Self {
            namespace: get("WATCH_NAMESPACE"),
            restart_limit,
            progress_interval,
            metrics_port: defaults.metrics_port,
            ovirt_image: get("OVIRT_POPULATOR_IMAGE").unwrap_or(defaults.ovirt_image),
            openstack_image: get("OPENSTACK_POPULATOR_IMAGE").unwrap_or(defaults.openstack_image),
            vsphere_xcopy_image: get("VSPHERE_XCOPY_POPULATOR_IMAGE").unwrap_or(defaults.vsphere_xcopy_image),
        })
    }

    /// Worker image for a populator kind
    pub fn image(&self, kind: PopulatorKind) -> &str {
        match kind {
            PopulatorKind::Ovirt => &self.ovirt_image,
            PopulatorKind::Openstack => &self.openstack_image,
            PopulatorKind::VsphereXcopy => &self.vsphere_xcopy_image,
        }
    }
}
