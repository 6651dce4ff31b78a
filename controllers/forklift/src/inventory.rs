//! Source adapters per provider.

use crate::cluster::ClusterClient;
use crate::error::ControllerError;
use crds::Provider;
use inventory_client::{InventoryClient, SourceAdapter, SourceCredentials};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a [`SourceAdapter`] bound to one provider
pub trait AdapterFactory: Send + Sync {
    fn adapter(&self, provider: &Provider, credentials: SourceCredentials) -> Arc<dyn SourceAdapter>;
}

/// Adapters backed by the inventory service
pub struct InventoryAdapters {
    client: InventoryClient,
}

impl InventoryAdapters {
    pub fn new(client: InventoryClient) -> Self {
        Self { client }
    }
}

impl AdapterFactory for InventoryAdapters {
    fn adapter(&self, provider: &Provider, credentials: SourceCredentials) -> Arc<dyn SourceAdapter> {
        let uid = provider.metadata.uid.clone().unwrap_or_default();
        Arc::new(
            self.client
                .adapter(provider.spec.type_, uid, provider.spec.url.clone(), credentials),
        )
    }
}

/// Decoded data of the provider's credential secret; empty when it has none.
pub async fn provider_secret_data(
    cluster: &dyn ClusterClient,
    provider: &Provider,
) -> Result<BTreeMap<String, Vec<u8>>, ControllerError> {
    let Some(secret_ref) = &provider.spec.secret else {
        return Ok(BTreeMap::new());
    };
    let provider_ns = provider.metadata.namespace.as_deref().unwrap_or("default");
    let namespace = secret_ref.namespace_or(provider_ns);
    let secret = cluster
        .get_secret(namespace, &secret_ref.name)
        .await?
        .ok_or_else(|| ControllerError::NotFound(format!("secret {}/{}", namespace, secret_ref.name)))?;
    Ok(secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}

/// Credentials from the provider's secret.
pub async fn provider_credentials(
    cluster: &dyn ClusterClient,
    provider: &Provider,
) -> Result<SourceCredentials, ControllerError> {
    let data = provider_secret_data(cluster, provider).await?;
    Ok(SourceCredentials::from_secret_bytes(&data))
}
