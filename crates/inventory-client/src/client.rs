//! Inventory service client and per-provider adapter
//!
//! The inventory service mirrors every source provider and serves listings at
//! `/providers/<type>/<uid>/<collection>?detail=4`.

use crate::adapters::{collections, ec2, openshift, openstack, ova, ovirt, vsphere};
use crate::common::{HttpClient, TlsOptions, build_client};
use crate::credentials::SourceCredentials;
use crate::disk::DiskStream;
use crate::error::InventoryError;
use crate::models::*;
use crate::offload::OffloadDriver;
use crate::source_trait::SourceAdapter;
use crate::transfer;
use crds::ProviderType;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Inventory service client
#[derive(Debug, Clone)]
pub struct InventoryClient {
    http: HttpClient,
}

impl InventoryClient {
    /// Create a new inventory client
    ///
    /// # Arguments
    /// * `base_url` - Inventory service URL (e.g., "https://forklift-inventory:8443")
    /// * `token` - Bearer token, usually the controller's service account token
    pub fn new(base_url: String, token: Option<String>, tls: &TlsOptions) -> Result<Self, InventoryError> {
        let client = build_client(tls, Some(Duration::from_secs(30)))?;
        Ok(Self {
            http: HttpClient::new(client, base_url, token),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Path of one provider collection listing
    pub fn collection_path(provider_type: ProviderType, provider_uid: &str, collection: &str) -> String {
        format!(
            "/providers/{}/{}/{}?{}",
            provider_type,
            urlencoding::encode(provider_uid),
            collection,
            HttpClient::build_query_string(&[("detail", "4")])
        )
    }

    /// Fetch one collection as raw JSON.
    pub async fn list(
        &self,
        provider_type: ProviderType,
        provider_uid: &str,
        collection: &str,
    ) -> Result<Value, InventoryError> {
        let path = Self::collection_path(provider_type, provider_uid, collection);
        debug!("Listing {} for {} provider {}", collection, provider_type, provider_uid);
        self.http.get(&path).await
    }

    /// Adapter bound to one provider
    pub fn adapter(
        &self,
        provider_type: ProviderType,
        provider_uid: impl Into<String>,
        endpoint_url: impl Into<String>,
        credentials: SourceCredentials,
    ) -> ProviderAdapter {
        ProviderAdapter {
            inventory: self.clone(),
            provider_type,
            provider_uid: provider_uid.into(),
            endpoint_url: endpoint_url.into(),
            credentials,
            offload: HashMap::new(),
        }
    }
}

/// [`SourceAdapter`] over the inventory service for one provider
#[derive(Debug, Clone)]
pub struct ProviderAdapter {
    inventory: InventoryClient,
    provider_type: ProviderType,
    provider_uid: String,
    endpoint_url: String,
    credentials: SourceCredentials,
    /// Offload drivers keyed by source storage id
    offload: HashMap<String, Arc<dyn OffloadDriver>>,
}

impl ProviderAdapter {
    /// Register an offload driver for disks on `storage_id`.
    pub fn with_offload(mut self, storage_id: impl Into<String>, driver: Arc<dyn OffloadDriver>) -> Self {
        self.offload.insert(storage_id.into(), driver);
        self
    }

    async fn list(&self, collection: &str) -> Result<Value, InventoryError> {
        self.inventory
            .list(self.provider_type, &self.provider_uid, collection)
            .await
    }
}

#[async_trait::async_trait]
impl SourceAdapter for ProviderAdapter {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn list_vms(&self) -> Result<Vec<Vm>, InventoryError> {
        let c = collections(self.provider_type);
        let vms = self.list(c.vms).await?;
        match self.provider_type {
            ProviderType::Vsphere => vsphere::parse_vms(vms),
            ProviderType::Ovirt => {
                let profiles = self.list("nicprofiles").await?;
                let disks = self.list("disks").await?;
                ovirt::parse_vms(vms, profiles, disks)
            }
            ProviderType::Openstack => {
                let volumes = self.list("volumes").await?;
                let types = self.list(c.storages).await?;
                let networks = self.list(c.networks).await?;
                openstack::parse_vms(vms, volumes, types, networks)
            }
            ProviderType::Ova => ova::parse_vms(vms, self.list(c.networks).await?),
            ProviderType::Ec2 => ec2::parse_vms(vms, self.list("volumes").await?),
            ProviderType::Openshift => openshift::parse_vms(vms, self.list(c.networks).await?),
        }
    }

    async fn list_networks(&self) -> Result<Vec<Network>, InventoryError> {
        let value = self.list(collections(self.provider_type).networks).await?;
        match self.provider_type {
            ProviderType::Vsphere => vsphere::parse_networks(value),
            ProviderType::Ovirt => ovirt::parse_networks(value),
            ProviderType::Openstack => openstack::parse_networks(value),
            ProviderType::Ova => ova::parse_networks(value),
            ProviderType::Ec2 => ec2::parse_networks(value),
            ProviderType::Openshift => openshift::parse_networks(value),
        }
    }

    async fn list_storages(&self) -> Result<Vec<Storage>, InventoryError> {
        let value = self.list(collections(self.provider_type).storages).await?;
        match self.provider_type {
            ProviderType::Vsphere => vsphere::parse_storages(value),
            ProviderType::Ovirt => ovirt::parse_storages(value),
            ProviderType::Openstack => openstack::parse_storages(value),
            ProviderType::Ova => ova::parse_storages(value),
            ProviderType::Ec2 => ec2::parse_storages(value),
            ProviderType::Openshift => openshift::parse_storages(value),
        }
    }

    async fn open_disk(&self, disk_id: &str, host: Option<&HostBinding>) -> Result<DiskStream, InventoryError> {
        match self.provider_type {
            ProviderType::Vsphere => {
                let host = host.ok_or_else(|| {
                    InventoryError::Unsupported("vSphere disk transfer needs an ESXi host binding".to_string())
                })?;
                transfer::open_vsphere_disk(disk_id, host).await
            }
            ProviderType::Ovirt => transfer::open_ovirt_disk(&self.endpoint_url, &self.credentials, disk_id).await,
            ProviderType::Openstack => transfer::open_openstack_image(&self.credentials, disk_id).await,
            ProviderType::Ova => {
                let vms = self.list_vms().await?;
                let file = vms
                    .iter()
                    .flat_map(|vm| vm.disks.iter())
                    .find(|d| d.id == disk_id)
                    .and_then(|d| d.file.clone())
                    .ok_or_else(|| InventoryError::ItemNotFound(format!("ova disk {disk_id}")))?;
                DiskStream::from_file(file).await
            }
            ProviderType::Ec2 | ProviderType::Openshift => Err(InventoryError::Unsupported(format!(
                "{} disks are not streamed by the populator",
                self.provider_type
            ))),
        }
    }

    fn can_offload(&self, storage_id: &str) -> Option<Arc<dyn OffloadDriver>> {
        self.offload.get(storage_id).cloned()
    }
}
