//! Mock SourceAdapter for unit testing
//!
//! In-memory inventories and disk contents, so reconcilers and the worker can
//! be exercised without an inventory service.

mod offload;

pub use offload::MockOffloadDriver;

use crate::disk::DiskStream;
use crate::error::InventoryError;
use crate::models::*;
use crate::offload::OffloadDriver;
use crate::source_trait::SourceAdapter;
use crds::ProviderType;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock SourceAdapter for testing
#[derive(Clone)]
pub struct MockSourceAdapter {
    provider_type: ProviderType,
    pub(crate) vms: Arc<Mutex<Vec<Vm>>>,
    pub(crate) networks: Arc<Mutex<Vec<Network>>>,
    pub(crate) storages: Arc<Mutex<Vec<Storage>>>,
    pub(crate) disks: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pub(crate) offload: Arc<Mutex<HashMap<String, Arc<dyn OffloadDriver>>>>,
    /// When set, every listing fails with `SourceUnavailable`
    pub(crate) unavailable: Arc<Mutex<Option<String>>>,
    /// Number of listing calls served
    pub(crate) list_calls: Arc<Mutex<usize>>,
}

impl std::fmt::Debug for MockSourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSourceAdapter")
            .field("provider_type", &self.provider_type)
            .finish_non_exhaustive()
    }
}

impl MockSourceAdapter {
    /// Create a new mock adapter
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            vms: Arc::new(Mutex::new(Vec::new())),
            networks: Arc::new(Mutex::new(Vec::new())),
            storages: Arc::new(Mutex::new(Vec::new())),
            disks: Arc::new(Mutex::new(HashMap::new())),
            offload: Arc::new(Mutex::new(HashMap::new())),
            unavailable: Arc::new(Mutex::new(None)),
            list_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Add a VM to the mock inventory (for test setup)
    pub fn add_vm(&self, vm: Vm) {
        self.vms.lock().unwrap().push(vm);
    }

    /// Change the reported power state of a VM
    pub fn set_power_state(&self, vm_id: &str, state: &str) {
        for vm in self.vms.lock().unwrap().iter_mut().filter(|vm| vm.id == vm_id) {
            vm.power_state = Some(state.to_string());
        }
    }

    /// Add a network to the mock inventory (for test setup)
    pub fn add_network(&self, network: Network) {
        self.networks.lock().unwrap().push(network);
    }

    /// Add a storage to the mock inventory (for test setup)
    pub fn add_storage(&self, storage: Storage) {
        self.storages.lock().unwrap().push(storage);
    }

    /// Set the bytes `open_disk` returns for a disk id
    pub fn add_disk_contents(&self, disk_id: impl Into<String>, bytes: Vec<u8>) {
        self.disks.lock().unwrap().insert(disk_id.into(), bytes);
    }

    /// Register an offload driver for a storage id
    pub fn add_offload(&self, storage_id: impl Into<String>, driver: Arc<dyn OffloadDriver>) {
        self.offload.lock().unwrap().insert(storage_id.into(), driver);
    }

    /// Make every listing fail until cleared with `None`
    pub fn set_unavailable(&self, message: Option<&str>) {
        *self.unavailable.lock().unwrap() = message.map(str::to_string);
    }

    /// Number of listing calls made so far
    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    fn check_available(&self) -> Result<(), InventoryError> {
        *self.list_calls.lock().unwrap() += 1;
        match self.unavailable.lock().unwrap().clone() {
            Some(message) => Err(InventoryError::SourceUnavailable(message)),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for MockSourceAdapter {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn list_vms(&self) -> Result<Vec<Vm>, InventoryError> {
        self.check_available()?;
        Ok(self.vms.lock().unwrap().clone())
    }

    async fn list_networks(&self) -> Result<Vec<Network>, InventoryError> {
        self.check_available()?;
        Ok(self.networks.lock().unwrap().clone())
    }

    async fn list_storages(&self) -> Result<Vec<Storage>, InventoryError> {
        self.check_available()?;
        Ok(self.storages.lock().unwrap().clone())
    }

    async fn open_disk(&self, disk_id: &str, _host: Option<&HostBinding>) -> Result<DiskStream, InventoryError> {
        self.disks
            .lock()
            .unwrap()
            .get(disk_id)
            .cloned()
            .map(DiskStream::from_bytes)
            .ok_or_else(|| InventoryError::ItemNotFound(format!("Disk {} not found", disk_id)))
    }

    fn can_offload(&self, storage_id: &str) -> Option<Arc<dyn OffloadDriver>> {
        self.offload.lock().unwrap().get(storage_id).cloned()
    }
}
