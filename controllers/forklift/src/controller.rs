//! Main controller implementation.
//!
//! Builds the Kubernetes and inventory clients, then runs one watcher task
//! per migration CRD until any of them exits.

use crate::cluster::KubeCluster;
use crate::config::Config;
use crate::error::ControllerError;
use crate::inventory::InventoryAdapters;
use crate::power::RestPowerManager;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::{Host, Migration, NetworkMap, Plan, Provider, StorageMap};
use inventory_client::{InventoryClient, TlsOptions};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

type WatchHandle = JoinHandle<Result<(), ControllerError>>;

/// Namespaced API, or cluster-wide when no namespace is configured.
fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Runs the migration watchers.
pub struct Controller {
    provider_watcher: WatchHandle,
    host_watcher: WatchHandle,
    network_map_watcher: WatchHandle,
    storage_map_watcher: WatchHandle,
    plan_watcher: WatchHandle,
    migration_watcher: WatchHandle,
}

impl Controller {
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing migration controller");

        let kube_client = Client::try_default().await?;
        let inventory = InventoryClient::new(
            config.inventory_url.clone(),
            config.inventory_token.clone(),
            &TlsOptions::default(),
        )?;

        let ns = config.namespace.clone();
        let ns = ns.as_deref();
        let provider_api: Api<Provider> = api(&kube_client, ns);
        let host_api: Api<Host> = api(&kube_client, ns);
        let network_map_api: Api<NetworkMap> = api(&kube_client, ns);
        let storage_map_api: Api<StorageMap> = api(&kube_client, ns);
        let plan_api: Api<Plan> = api(&kube_client, ns);
        let migration_api: Api<Migration> = api(&kube_client, ns);

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeCluster::new(kube_client)),
            Arc::new(InventoryAdapters::new(inventory)),
            Arc::new(RestPowerManager),
            config,
        ));
        let watcher = Arc::new(Watcher::new(
            reconciler,
            provider_api,
            host_api,
            network_map_api,
            storage_map_api,
            plan_api,
            migration_api,
        ));

        let provider_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_providers().await })
        };
        let host_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_hosts().await })
        };
        let network_map_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_network_maps().await })
        };
        let storage_map_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_storage_maps().await })
        };
        let plan_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_plans().await })
        };
        let migration_watcher = {
            let watcher = watcher;
            tokio::spawn(async move { watcher.watch_migrations().await })
        };

        Ok(Self {
            provider_watcher,
            host_watcher,
            network_map_watcher,
            storage_map_watcher,
            plan_watcher,
            migration_watcher,
        })
    }

    /// Runs the controller until a watcher exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Migration controller running");

        tokio::select! {
            result = &mut self.provider_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Provider watcher panicked: {}", e)))??;
            }
            result = &mut self.host_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Host watcher panicked: {}", e)))??;
            }
            result = &mut self.network_map_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("NetworkMap watcher panicked: {}", e)))??;
            }
            result = &mut self.storage_map_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("StorageMap watcher panicked: {}", e)))??;
            }
            result = &mut self.plan_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Plan watcher panicked: {}", e)))??;
            }
            result = &mut self.migration_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Migration watcher panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
