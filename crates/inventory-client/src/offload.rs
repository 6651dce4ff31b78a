//! Storage-array copy offload
//!
//! For vSphere disks on arrays that support xcopy, the array can copy extents
//! directly into the target volume. Vendor SDK bindings implement
//! [`OffloadDriver`]; this module defines the contract, the registry the
//! worker selects drivers from, and the offload secret schema.

use crate::error::OffloadError;
use crds::StorageVendorProduct;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The target persistent volume an array copies into
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetVolume {
    pub pv_name: String,
    /// CSI volume handle
    pub volume_handle: String,
    pub volume_attributes: BTreeMap<String, String>,
}

/// Array-side session returned by [`OffloadDriver::prepare`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadSession {
    pub id: String,
    pub vendor: StorageVendorProduct,
    pub source_disk: String,
    pub target: TargetVolume,
    /// Driver-private state (LUN ids, mapping groups, ...)
    pub state: BTreeMap<String, String>,
}

/// Storage-array copy driver
#[async_trait::async_trait]
pub trait OffloadDriver: Send + Sync + fmt::Debug {
    fn vendor(&self) -> StorageVendorProduct;

    /// Establish an array-side session mapping the source disk and target volume.
    async fn prepare(&self, source_disk: &str, target: &TargetVolume) -> Result<OffloadSession, OffloadError>;

    /// Start the copy. The channel yields progress in `[0, 100]` and closes
    /// when the copy is done.
    async fn copy(&self, session: &OffloadSession) -> Result<mpsc::Receiver<u8>, OffloadError>;

    /// Release array-side resources.
    async fn finalize(&self, session: OffloadSession) -> Result<(), OffloadError>;
}

/// Drivers by vendor
#[derive(Debug, Clone, Default)]
pub struct OffloadRegistry {
    drivers: HashMap<StorageVendorProduct, Arc<dyn OffloadDriver>>,
}

impl OffloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn OffloadDriver>) {
        self.drivers.insert(driver.vendor(), driver);
    }

    pub fn get(&self, vendor: StorageVendorProduct) -> Option<Arc<dyn OffloadDriver>> {
        self.drivers.get(&vendor).cloned()
    }

    /// Driver for `vendor`, or `UnsupportedVendor`.
    pub fn require(&self, vendor: StorageVendorProduct) -> Result<Arc<dyn OffloadDriver>, OffloadError> {
        self.get(vendor)
            .ok_or_else(|| OffloadError::UnsupportedVendor(vendor.as_str().to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

/// Offload secret: source-platform and array credentials in one record
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OffloadCredentials {
    pub user: String,
    pub password: String,
    /// vCenter / ESXi URL
    pub url: String,
    pub storage_user: String,
    pub storage_password: String,
    pub storage_endpoint: String,
    /// PEM bundle, already resolved
    pub cacert: Option<String>,
    pub insecure_skip_verify: bool,
}

impl fmt::Debug for OffloadCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadCredentials")
            .field("user", &self.user)
            .field("url", &self.url)
            .field("storage_user", &self.storage_user)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish_non_exhaustive()
    }
}

const REQUIRED_KEYS: [&str; 6] = ["user", "password", "url", "storageUser", "storagePassword", "storageEndpoint"];

impl OffloadCredentials {
    /// Parse decoded secret data. Every required key must be non-empty.
    pub fn from_map(data: &BTreeMap<String, String>) -> Result<Self, OffloadError> {
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|k| data.get(*k).is_none_or(|v| v.trim().is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(OffloadError::Credentials(format!("missing keys: {}", missing.join(", "))));
        }
        let get = |k: &str| data.get(k).map(|v| v.trim().to_string()).unwrap_or_default();
        Ok(Self {
            user: get("user"),
            password: get("password"),
            url: get("url"),
            storage_user: get("storageUser"),
            storage_password: get("storagePassword"),
            storage_endpoint: get("storageEndpoint"),
            cacert: data.get("cacert").cloned().filter(|v| !v.trim().is_empty()),
            insecure_skip_verify: data
                .get("insecureSkipVerify")
                .is_some_and(|v| crate::credentials::parse_bool(v)),
        })
    }

    /// Replace an `@path` CA reference with the file's contents.
    pub fn resolve_cacert(mut self) -> Result<Self, OffloadError> {
        if let Some(value) = self.cacert.take() {
            self.cacert = Some(resolve_file_reference(&value)?);
        }
        Ok(self)
    }

    /// Secret `stringData` for this record.
    pub fn to_secret_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::from([
            ("user".to_string(), self.user.clone()),
            ("password".to_string(), self.password.clone()),
            ("url".to_string(), self.url.clone()),
            ("storageUser".to_string(), self.storage_user.clone()),
            ("storagePassword".to_string(), self.storage_password.clone()),
            ("storageEndpoint".to_string(), self.storage_endpoint.clone()),
        ]);
        if let Some(ca) = &self.cacert {
            data.insert("cacert".to_string(), ca.clone());
        }
        if self.insecure_skip_verify {
            data.insert("insecureSkipVerify".to_string(), "true".to_string());
        }
        data
    }
}

/// `@path` reads the file at `path`; any other value is returned unchanged.
pub fn resolve_file_reference(value: &str) -> Result<String, OffloadError> {
    match value.strip_prefix('@') {
        Some(path) => Ok(std::fs::read_to_string(Path::new(path.trim()))?),
        None => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> BTreeMap<String, String> {
        [
            ("user", "administrator@vsphere.local"),
            ("password", "pw"),
            ("url", "https://vcenter.example.com"),
            ("storageUser", "array-admin"),
            ("storagePassword", "array-pw"),
            ("storageEndpoint", "https://array.example.com"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_missing_keys_are_named() {
        let mut data = complete();
        data.remove("storageEndpoint");
        data.insert("storageUser".to_string(), String::new());
        let err = OffloadCredentials::from_map(&data).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("storageUser"));
        assert!(msg.contains("storageEndpoint"));
    }

    #[test]
    fn test_cacert_file_reference() {
        let path = std::env::temp_dir().join(format!("offload-ca-{}.pem", std::process::id()));
        std::fs::write(&path, "-----BEGIN CERTIFICATE-----\n").unwrap();
        let mut data = complete();
        data.insert("cacert".to_string(), format!("@{}", path.display()));

        let creds = OffloadCredentials::from_map(&data).unwrap().resolve_cacert().unwrap();
        assert_eq!(creds.cacert.as_deref(), Some("-----BEGIN CERTIFICATE-----\n"));
        assert!(creds.to_secret_data()["cacert"].starts_with("-----BEGIN"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_inline_cacert_unchanged() {
        assert_eq!(resolve_file_reference("PEM").unwrap(), "PEM");
        assert!(resolve_file_reference("@/nonexistent/ca.pem").is_err());
    }

    #[test]
    fn test_registry_requires_vendor() {
        let registry = OffloadRegistry::new();
        assert!(registry.is_empty());
        let err = registry.require(StorageVendorProduct::Ontap).unwrap_err();
        assert!(matches!(err, OffloadError::UnsupportedVendor(_)));
    }
}
