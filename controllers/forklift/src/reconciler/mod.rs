//! Reconciliation logic for the migration CRDs.
//!
//! - `provider`: connection test and token secret
//! - `host`: per-host credentials and ownership (ESXi)
//! - `map`: NetworkMap / StorageMap validation
//! - `plan`: VM resolution, default maps, readiness
//! - `migration`: the per-VM pipeline

pub mod host;
pub mod map;
pub mod migration;
pub mod plan;
pub mod provider;


use crate::backoff::BackoffRegistry;
use crate::cluster::{ClusterClient, EventRecord, ResourceKind};
use crate::config::Config;
use crate::error::ControllerError;
use crate::inventory::{AdapterFactory, provider_credentials};
use crate::power::PowerManager;
use crds::Provider;
use crds::condition::{self, Condition, condition_type};
use inventory_client::SourceAdapter;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Finalizer on Plans and Migrations
pub const FINALIZER: &str = "forklift.konveyor.io/finalizer";

/// Reconciles migration resources.
pub struct Reconciler {
    pub(crate) cluster: Arc<dyn ClusterClient>,
    pub(crate) adapters: Arc<dyn AdapterFactory>,
    pub(crate) power: Arc<dyn PowerManager>,
    pub(crate) config: Config,
    backoff: BackoffRegistry,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        adapters: Arc<dyn AdapterFactory>,
        power: Arc<dyn PowerManager>,
        config: Config,
    ) -> Self {
        Self {
            cluster,
            adapters,
            power,
            config,
            backoff: BackoffRegistry::new(),
        }
    }

    /// Requeue decision after a failed reconcile of `key`.
    pub fn error_action(&self, key: &str, error: &ControllerError) -> Action {
        if !error.is_retriable() {
            debug!("{} failed with a terminal error, waiting for a change", key);
            return Action::await_change();
        }
        let (delay, count) = self.backoff.failure(key);
        warn!("{} failed {} time(s), retrying in {:?}: {}", key, count, delay, error);
        Action::requeue(delay)
    }

    /// Forget earlier failures of `key`.
    pub fn reset_backoff(&self, key: &str) {
        self.backoff.success(key);
    }

    /// Source adapter for `provider`, using its credential secret.
    pub(crate) async fn adapter_for(&self, provider: &Provider) -> Result<Arc<dyn SourceAdapter>, ControllerError> {
        let credentials = provider_credentials(self.cluster.as_ref(), provider).await?;
        Ok(self.adapters.adapter(provider, credentials))
    }

    /// Publish an event; failures are logged only.
    pub(crate) async fn event<K>(&self, object: &K, event: EventRecord)
    where
        K: Resource<DynamicType = ()>,
    {
        let reference = object.object_ref(&());
        if let Err(e) = self.cluster.publish_event(&reference, event).await {
            warn!("Failed to publish event for {:?}: {}", reference.name, e);
        }
    }

    pub(crate) async fn write_status<S: Serialize + Sync>(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        status: &S,
    ) -> Result<(), ControllerError> {
        let status = serde_json::to_value(status)?;
        self.cluster.patch_status(kind, namespace, name, &status).await
    }

    /// Write the finalizer list of a Plan or Migration.
    pub(crate) async fn set_finalizers(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        self.cluster.patch_resource(kind, namespace, name, &patch).await
    }
}

/// Namespace and name of an object.
pub(crate) fn identity<K: ResourceExt>(object: &K) -> (String, String) {
    (object.namespace().unwrap_or_else(|| "default".to_string()), object.name_any())
}

pub(crate) fn has_finalizer<K: ResourceExt>(object: &K) -> bool {
    object.finalizers().iter().any(|f| f == FINALIZER)
}

/// Finalizers of `object` with ours added.
pub(crate) fn with_finalizer<K: ResourceExt>(object: &K) -> Vec<String> {
    let mut finalizers = object.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    finalizers
}

/// Finalizers of `object` with ours removed.
pub(crate) fn without_finalizer<K: ResourceExt>(object: &K) -> Vec<String> {
    object.finalizers().iter().filter(|f| *f != FINALIZER).cloned().collect()
}

/// Set `Ready` (and mirror it into `extra` when given) on a condition list.
pub(crate) fn set_ready(conditions: &mut Vec<Condition>, ready: Result<(), (&str, String)>, extra: Option<&str>) {
    let (ready, other) = match ready {
        Ok(()) => (
            Condition::truthy(condition_type::READY, condition::reason::READY, "The resource is ready."),
            extra.map(|t| Condition::truthy(t, condition::reason::READY, "")),
        ),
        Err((reason, message)) => (
            Condition::falsy(condition_type::READY, reason, message.clone()),
            extra.map(|t| Condition::falsy(t, reason, message)),
        ),
    };
    condition::set(conditions, ready);
    if let Some(other) = other {
        condition::set(conditions, other);
    }
}
