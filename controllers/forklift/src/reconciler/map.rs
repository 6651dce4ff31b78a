//! NetworkMap and StorageMap reconcilers
//!
//! A map is ready when its pairs satisfy the map invariants and every
//! source names an object in the source provider's inventory.

use super::{Reconciler, identity, set_ready};
use crate::cluster::ResourceKind;
use crate::error::ControllerError;
use crds::condition::{condition_type, reason};
use crds::{MapStatus, NetworkMap, Provider, ProviderPair, ProviderType, SourceRef, StorageMap};
use kube_runtime::controller::Action;
use mapping::{MappingError, validate_network_pairs, validate_storage_pairs};
use tracing::{info, warn};

/// Outcome of resolving the source provider of a map
enum SourceProvider {
    Ready(Provider),
    NotReady(String),
}

/// Every source must match an inventory record by id or name.
///
/// Sources carrying only a `type` (e.g. the OpenStack default volume type)
/// have nothing to look up.
pub fn check_sources<'a>(
    sources: impl Iterator<Item = &'a SourceRef>,
    inventory: &[(String, String)],
) -> Result<(), MappingError> {
    for source in sources {
        if source.identity().is_empty() {
            continue;
        }
        let found = inventory.iter().any(|(id, name)| {
            source.id.as_deref().is_some_and(|s| !s.is_empty() && s == id)
                || source.name.as_deref().is_some_and(|s| !s.is_empty() && s == name)
        });
        if !found {
            let shown = source.name.clone().or_else(|| source.id.clone()).unwrap_or_default();
            return Err(MappingError::SourceNotFound(shown));
        }
    }
    Ok(())
}

impl Reconciler {
    async fn check_network_sources(&self, map: &NetworkMap, provider: &Provider) -> Result<(), ControllerError> {
        let adapter = self.adapter_for(provider).await?;
        let inventory: Vec<(String, String)> = adapter
            .list_networks()
            .await?
            .into_iter()
            .map(|n| (n.id, n.name))
            .collect();
        check_sources(map.spec.map.iter().map(|p| &p.source), &inventory)?;
        Ok(())
    }

    async fn check_storage_sources(&self, map: &StorageMap, provider: &Provider) -> Result<(), ControllerError> {
        let adapter = self.adapter_for(provider).await?;
        let inventory: Vec<(String, String)> = adapter
            .list_storages()
            .await?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        check_sources(map.spec.map.iter().map(|p| &p.source), &inventory)?;
        Ok(())
    }

    async fn source_provider(&self, pair: &ProviderPair, namespace: &str) -> Result<SourceProvider, ControllerError> {
        let provider_ns = pair.source.namespace_or(namespace);
        let Some(provider) = self.cluster.get_provider(provider_ns, &pair.source.name).await? else {
            return Ok(SourceProvider::NotReady(format!(
                "source provider {}/{} not found",
                provider_ns, pair.source.name
            )));
        };
        let ready = provider
            .status
            .as_ref()
            .is_some_and(|s| crds::condition::is_true(&s.conditions, condition_type::READY));
        if !ready {
            return Ok(SourceProvider::NotReady(format!(
                "source provider {}/{} is not ready",
                provider_ns, pair.source.name
            )));
        }
        Ok(SourceProvider::Ready(provider))
    }

    /// Shared tail of both map reconcilers.
    async fn finish_map(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        mut status: MapStatus,
        result: Result<(), ControllerError>,
    ) -> Result<Action, ControllerError> {
        match result {
            Ok(()) => {
                info!("{} {}/{} is valid", kind, namespace, name);
                set_ready(&mut status.conditions, Ok(()), Some(condition_type::VALID_MAPPING));
                self.write_status(kind, namespace, name, &status).await?;
                Ok(Action::await_change())
            }
            Err(e) => {
                warn!("{} {}/{} is not valid: {}", kind, namespace, name, e);
                set_ready(
                    &mut status.conditions,
                    Err((e.reason(), e.to_string())),
                    Some(condition_type::VALID_MAPPING),
                );
                self.write_status(kind, namespace, name, &status).await?;
                if e.is_retriable() {
                    Err(e)
                } else {
                    Ok(Action::await_change())
                }
            }
        }
    }

    async fn map_not_ready(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        mut status: MapStatus,
        message: String,
    ) -> Result<Action, ControllerError> {
        info!("{} {}/{} waiting: {}", kind, namespace, name, message);
        set_ready(
            &mut status.conditions,
            Err((reason::PROVIDER_NOT_READY, message)),
            Some(condition_type::VALID_MAPPING),
        );
        self.write_status(kind, namespace, name, &status).await?;
        Ok(Action::requeue(self.config.requeue))
    }

    pub async fn reconcile_network_map(&self, map: &NetworkMap) -> Result<Action, ControllerError> {
        let (namespace, name) = identity(map);
        info!("Reconciling NetworkMap {}/{}", namespace, name);
        let mut status = map.status.clone().unwrap_or_default();
        status.observed_generation = map.metadata.generation;

        if let Err(e) = validate_network_pairs(&map.spec.map) {
            return self
                .finish_map(ResourceKind::NetworkMap, &namespace, &name, status, Err(e.into()))
                .await;
        }
        let provider = match self.source_provider(&map.spec.provider, &namespace).await? {
            SourceProvider::Ready(p) => p,
            SourceProvider::NotReady(message) => {
                return self
                    .map_not_ready(ResourceKind::NetworkMap, &namespace, &name, status, message)
                    .await;
            }
        };

        let result = self.check_network_sources(map, &provider).await;
        self.finish_map(ResourceKind::NetworkMap, &namespace, &name, status, result)
            .await
    }

    pub async fn reconcile_storage_map(&self, map: &StorageMap) -> Result<Action, ControllerError> {
        let (namespace, name) = identity(map);
        info!("Reconciling StorageMap {}/{}", namespace, name);
        let mut status = map.status.clone().unwrap_or_default();
        status.observed_generation = map.metadata.generation;

        if let Err(e) = validate_storage_pairs(&map.spec.map) {
            return self
                .finish_map(ResourceKind::StorageMap, &namespace, &name, status, Err(e.into()))
                .await;
        }
        let provider = match self.source_provider(&map.spec.provider, &namespace).await? {
            SourceProvider::Ready(p) => p,
            SourceProvider::NotReady(message) => {
                return self
                    .map_not_ready(ResourceKind::StorageMap, &namespace, &name, status, message)
                    .await;
            }
        };

        // OpenShift sources map storage classes, which the inventory does not list.
        let result = if provider.spec.type_ == ProviderType::Openshift {
            Ok(())
        } else {
            self.check_storage_sources(map, &provider).await
        };
        self.finish_map(ResourceKind::StorageMap, &namespace, &name, status, result)
            .await
    }
}
