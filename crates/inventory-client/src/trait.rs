//! SourceAdapter trait for mocking
//!
//! This trait abstracts the per-platform read view so that reconcilers can be
//! tested against in-memory inventories.

use crate::disk::DiskStream;
use crate::error::InventoryError;
use crate::models::*;
use crate::offload::OffloadDriver;
use crds::ProviderType;
use std::sync::Arc;

/// Per-platform read-only view of a source provider
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Platform this adapter reads
    fn provider_type(&self) -> ProviderType;

    async fn list_vms(&self) -> Result<Vec<Vm>, InventoryError>;
    async fn list_networks(&self) -> Result<Vec<Network>, InventoryError>;
    async fn list_storages(&self) -> Result<Vec<Storage>, InventoryError>;

    /// Open a readable byte stream of known length for one disk.
    async fn open_disk(
        &self,
        disk_id: &str,
        host: Option<&HostBinding>,
    ) -> Result<DiskStream, InventoryError>;

    /// Offload driver able to copy disks that live on `storage_id`.
    fn can_offload(&self, storage_id: &str) -> Option<Arc<dyn OffloadDriver>>;

    /// Find a VM by id, falling back to name (and namespace when given).
    async fn find_vm(
        &self,
        id: Option<&str>,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<Vm, InventoryError> {
        let vms = self.list_vms().await?;
        find_vm_in(&vms, id, name, namespace)
            .cloned()
            .ok_or_else(|| InventoryError::ItemNotFound(format!("vm {}", id.unwrap_or(name))))
    }
}

/// Resolve a VM reference against a listing.
///
/// A non-empty id wins; otherwise the name must match, and the namespace too
/// when one is given.
pub fn find_vm_in<'a>(
    vms: &'a [Vm],
    id: Option<&str>,
    name: &str,
    namespace: Option<&str>,
) -> Option<&'a Vm> {
    if let Some(id) = id.filter(|id| !id.is_empty()) {
        return vms.iter().find(|vm| vm.id == id);
    }
    vms.iter().find(|vm| {
        vm.name == name
            && namespace.is_none_or(|ns| ns.is_empty() || vm.namespace.as_deref() == Some(ns))
    })
}
