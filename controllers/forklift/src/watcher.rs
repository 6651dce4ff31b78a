//! Kubernetes resource watchers.
//!
//! Every CRD gets its own `kube_runtime::Controller` loop through the generic
//! `watch_resource()` helper. Reconcile errors feed the per-key back-off of
//! the shared [`Reconciler`].

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Host, Migration, NetworkMap, Plan, Provider, StorageMap};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Key used for back-off bookkeeping
fn backoff_key<K: ResourceExt>(resource_name: &str, obj: &K) -> String {
    format!(
        "{}/{}/{}",
        resource_name,
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Run a `kube_runtime::Controller` for `K` until the stream ends.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        error!("Reconciliation error for {} {}: {}", resource_name, obj.name_any(), error);
        ctx.error_action(&backoff_key(resource_name, obj.as_ref()), error)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.name_any());
            let key = backoff_key(resource_name, obj.as_ref());
            let result = reconcile_fn(ctx.clone(), obj).await;
            if result.is_ok() {
                ctx.reset_backoff(&key);
            }
            result
        }
    };

    // Debounce batches bursts of status writes into one pass.
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Ok(())
}

/// Watches the migration CRDs.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    provider_api: Api<Provider>,
    host_api: Api<Host>,
    network_map_api: Api<NetworkMap>,
    storage_map_api: Api<StorageMap>,
    plan_api: Api<Plan>,
    migration_api: Api<Migration>,
}

impl Watcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        provider_api: Api<Provider>,
        host_api: Api<Host>,
        network_map_api: Api<NetworkMap>,
        storage_map_api: Api<StorageMap>,
        plan_api: Api<Plan>,
        migration_api: Api<Migration>,
    ) -> Self {
        Self {
            reconciler,
            provider_api,
            host_api,
            network_map_api,
            storage_map_api,
            plan_api,
            migration_api,
        }
    }

    pub async fn watch_providers(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.provider_api.clone(),
            self.reconciler.clone(),
            |reconciler, provider| Box::pin(async move { reconciler.reconcile_provider(&provider).await }),
            "Provider",
        )
        .await
    }

    pub async fn watch_hosts(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.host_api.clone(),
            self.reconciler.clone(),
            |reconciler, host| Box::pin(async move { reconciler.reconcile_host(&host).await }),
            "Host",
        )
        .await
    }

    pub async fn watch_network_maps(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.network_map_api.clone(),
            self.reconciler.clone(),
            |reconciler, map| Box::pin(async move { reconciler.reconcile_network_map(&map).await }),
            "NetworkMap",
        )
        .await
    }

    pub async fn watch_storage_maps(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.storage_map_api.clone(),
            self.reconciler.clone(),
            |reconciler, map| Box::pin(async move { reconciler.reconcile_storage_map(&map).await }),
            "StorageMap",
        )
        .await
    }

    pub async fn watch_plans(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.plan_api.clone(),
            self.reconciler.clone(),
            |reconciler, plan| Box::pin(async move { reconciler.reconcile_plan(&plan).await }),
            "Plan",
        )
        .await
    }

    pub async fn watch_migrations(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.migration_api.clone(),
            self.reconciler.clone(),
            |reconciler, migration| Box::pin(async move { reconciler.reconcile_migration(&migration).await }),
            "Migration",
        )
        .await
    }
}
