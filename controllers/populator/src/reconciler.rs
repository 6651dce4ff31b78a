//! Reconciliation of PVCs backed by a populator request.
//!
//! A PVC whose `dataSourceRef` names an `OvirtVolumePopulator`,
//! `OpenstackVolumePopulator` or `VSphereXcopyVolumePopulator` is filled in
//! four stages:
//!
//! 1. a worker pod writes the source disk into a shadow PVC `prime-<uid>`
//! 2. progress scraped from the worker lands in the request's status
//! 3. once the worker succeeds, the shadow's PV is re-pointed at the user PVC
//! 4. when the shadow is `Lost`, the pod, the shadow and the finalizer go
//!
//! The user PVC carries `populate-target-protection` until stage 4 so the
//! shadow objects are never orphaned.

use crate::cluster::{EventRecord, PopulatorCluster};
use crate::config::Config;
use crate::error::PopulatorError;
use crate::pod::{PopulatorSource, SELECTED_NODE_ANNOTATION, shadow_pvc, shadow_pvc_name, worker_pod, worker_pod_name};
use crate::progress::{ProgressSource, metrics_url, parse_progress};
use crds::{
    API_GROUP, POPULATE_TARGET_FINALIZER, POPULATED_FROM_ANNOTATION, PopulatorKind, PopulatorStatus,
    RECREATIONS_ANNOTATION,
};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const INTREE_PREFIX: &str = "kubernetes.io/";
const MIGRATED_TO_ANNOTATION: &str = "volume.beta.kubernetes.io/migrated-to";
const WAIT_FOR_FIRST_CONSUMER: &str = "WaitForFirstConsumer";
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Populator kind and request name named by the PVC's `dataSourceRef`.
pub fn populator_ref(pvc: &PersistentVolumeClaim) -> Option<(PopulatorKind, String)> {
    let source = pvc.spec.as_ref()?.data_source_ref.as_ref()?;
    if source.api_group.as_deref() != Some(API_GROUP) || source.name.is_empty() {
        return None;
    }
    Some((PopulatorKind::from_kind(&source.kind)?, source.name.clone()))
}

fn recreations(pvc: &PersistentVolumeClaim) -> u32 {
    pvc.annotations()
        .get(RECREATIONS_ANNOTATION)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn has_finalizer(pvc: &PersistentVolumeClaim) -> bool {
    pvc.finalizers().iter().any(|f| f == POPULATE_TARGET_FINALIZER)
}

fn phase(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.status.as_ref()?.phase.as_deref()
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("Pending")
}

/// Merge patch guarded by the object's resourceVersion
fn guarded(pvc: &PersistentVolumeClaim, mut patch: Value) -> Value {
    if let Some(version) = pvc.resource_version() {
        patch["metadata"]["resourceVersion"] = json!(version);
    }
    patch
}

/// Why a storage class cannot take a populated volume, if it cannot.
fn intree_unsupported(pvc: &PersistentVolumeClaim, class: &StorageClass) -> Option<String> {
    if !class.provisioner.starts_with(INTREE_PREFIX) {
        return None;
    }
    let migrated = pvc
        .annotations()
        .get(MIGRATED_TO_ANNOTATION)
        .is_some_and(|v| !v.is_empty());
    (!migrated).then(|| format!("in-tree provisioner {} cannot populate volumes", class.provisioner))
}

/// Reconciles populated PVCs.
pub struct Reconciler {
    cluster: Arc<dyn PopulatorCluster>,
    progress: Arc<dyn ProgressSource>,
    config: Config,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn PopulatorCluster>, progress: Arc<dyn ProgressSource>, config: Config) -> Self {
        Self {
            cluster,
            progress,
            config,
        }
    }

    /// Requeue decision after a failed reconcile.
    pub fn error_action(&self, error: &PopulatorError) -> Action {
        if error.is_retriable() {
            Action::requeue(ERROR_REQUEUE)
        } else {
            Action::await_change()
        }
    }

    fn waiting(&self) -> Action {
        Action::requeue(self.config.progress_interval)
    }

    async fn event(&self, pvc: &PersistentVolumeClaim, event: EventRecord) {
        let reason = event.reason.clone();
        if let Err(e) = self.cluster.publish_event(&pvc.object_ref(&()), event).await {
            warn!("Failed to publish {} event for PVC {}: {}", reason, pvc.name_any(), e);
        }
    }

    /// Reconciles one PVC.
    pub async fn reconcile_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<Action, PopulatorError> {
        let Some((kind, request)) = populator_ref(pvc) else {
            return Ok(Action::await_change());
        };
        let Some(uid) = pvc.uid() else {
            return Ok(Action::await_change());
        };
        let namespace = pvc.namespace().unwrap_or_default();
        let name = pvc.name_any();

        if pvc.meta().deletion_timestamp.is_some() {
            if has_finalizer(pvc) {
                info!("PVC {}/{} is being deleted, releasing population objects", namespace, name);
                self.release(pvc, &uid).await?;
            }
            return Ok(Action::await_change());
        }

        let bound = pvc
            .spec
            .as_ref()
            .and_then(|s| s.volume_name.as_deref())
            .is_some_and(|v| !v.is_empty());
        if bound {
            return self.finish(pvc, &uid).await;
        }

        let Some(object) = self.cluster.get_populator(kind, &namespace, &request).await? else {
            debug!("{} {}/{} not found, waiting", kind, namespace, request);
            return Ok(self.waiting());
        };
        let source = match PopulatorSource::from_object(kind, &object) {
            Ok(source) => source,
            Err(e) => {
                warn!("PVC {}/{}: {}", namespace, name, e);
                self.event(pvc, EventRecord::warning(e.reason(), e.to_string())).await;
                return Ok(Action::await_change());
            }
        };

        let mut node = None;
        if let Some(class_name) = pvc.spec.as_ref().and_then(|s| s.storage_class_name.as_deref()) {
            let Some(class) = self.cluster.get_storage_class(class_name).await? else {
                debug!("StorageClass {} not found, waiting", class_name);
                return Ok(self.waiting());
            };
            if let Some(reason) = intree_unsupported(pvc, &class) {
                warn!("PVC {}/{}: {}", namespace, name, reason);
                self.event(pvc, EventRecord::warning("IntreeUnsupported", reason)).await;
                return Ok(Action::await_change());
            }
            if class.volume_binding_mode.as_deref() == Some(WAIT_FOR_FIRST_CONSUMER) {
                match pvc.annotations().get(SELECTED_NODE_ANNOTATION) {
                    Some(selected) => node = Some(selected.clone()),
                    None => {
                        debug!("PVC {}/{} waits for a node to be selected", namespace, name);
                        return Ok(self.waiting());
                    }
                }
            }
        }

        self.set_finalizer(pvc, true).await?;

        let pod_name = worker_pod_name(&uid);
        let Some(pod) = self.cluster.get_pod(&namespace, &pod_name).await? else {
            return self.start(pvc, &source, node.as_deref()).await;
        };

        match pod_phase(&pod) {
            "Succeeded" => self.hand_over(pvc, &source, &uid).await,
            "Failed" => self.retry_worker(pvc, &pod_name).await,
            _ => {
                self.scrape(pvc, &source, &pod).await;
                Ok(self.waiting())
            }
        }
    }

    /// Create the worker pod and its shadow PVC.
    async fn start(
        &self,
        pvc: &PersistentVolumeClaim,
        source: &PopulatorSource,
        node: Option<&str>,
    ) -> Result<Action, PopulatorError> {
        let pod = worker_pod(source, pvc, &self.config, node);
        let pod_name = pod.name_any();
        if let Err(e) = self.cluster.create_pod(&pod).await {
            self.event(pvc, EventRecord::warning("PopulatorCreationError", format!("Failed to create populator pod: {e}")))
                .await;
            return Err(e);
        }
        info!("Created populator pod {}/{} for {} {}", pod.namespace().unwrap_or_default(), pod_name, source.kind, source.name);
        self.event(pvc, EventRecord::normal("PopulatorCreated", format!("Populator pod {pod_name} started"))).await;

        let shadow = shadow_pvc(pvc, node);
        let shadow_name = shadow.name_any();
        let namespace = pvc.namespace().unwrap_or_default();
        if self.cluster.get_pvc(&namespace, &shadow_name).await?.is_none() {
            if let Err(e) = self.cluster.create_pvc(&shadow).await {
                self.event(
                    pvc,
                    EventRecord::warning("PopulatorPVCCreationError", format!("Failed to create PVC {shadow_name}: {e}")),
                )
                .await;
                return Err(e);
            }
        }
        Ok(self.waiting())
    }

    /// Copy the worker's progress into the request status.
    async fn scrape(&self, pvc: &PersistentVolumeClaim, source: &PopulatorSource, pod: &Pod) {
        let Some(ip) = pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.as_deref())
            .filter(|ip| !ip.is_empty())
        else {
            return;
        };
        let url = metrics_url(ip, self.config.metrics_port);
        let text = match self.progress.fetch(&url).await {
            Ok(text) => text,
            Err(e) => {
                debug!("Progress of {} unavailable: {}", pod.name_any(), e);
                return;
            }
        };
        let Some(percent) = parse_progress(&text, source.kind, &source.source_id) else {
            return;
        };
        if let Err(e) = self.record_progress(pvc, source, percent).await {
            warn!("Failed to record progress of {} {}: {}", source.kind, source.name, e);
        }
    }

    async fn record_progress(
        &self,
        pvc: &PersistentVolumeClaim,
        source: &PopulatorSource,
        percent: u8,
    ) -> Result<(), PopulatorError> {
        let current = self
            .cluster
            .get_populator(source.kind, &source.namespace, &source.name)
            .await?
            .and_then(|o| serde_json::from_value::<PopulatorStatus>(o["status"].clone()).ok())
            .unwrap_or_default();
        let progress = percent.to_string();
        if current.progress == progress {
            return Ok(());
        }
        self.cluster
            .patch_populator_status(source.kind, &source.namespace, &source.name, &json!({ "progress": progress }))
            .await?;
        if current.progress.is_empty() {
            self.event(
                pvc,
                EventRecord::normal("PopulatorProgress", format!("Started monitoring progress of {} {}", source.kind, source.name)),
            )
            .await;
        }
        Ok(())
    }

    /// Recreate a failed worker until the restart limit is spent.
    async fn retry_worker(&self, pvc: &PersistentVolumeClaim, pod_name: &str) -> Result<Action, PopulatorError> {
        let namespace = pvc.namespace().unwrap_or_default();
        let count = recreations(pvc);
        if count < self.config.restart_limit {
            let patch = guarded(
                pvc,
                json!({ "metadata": { "annotations": { RECREATIONS_ANNOTATION: (count + 1).to_string() } } }),
            );
            self.cluster.patch_pvc(&namespace, &pvc.name_any(), &patch).await?;
            self.cluster.delete_pod(&namespace, pod_name).await?;
            info!("Populator pod {}/{} failed, recreating ({}/{})", namespace, pod_name, count + 1, self.config.restart_limit);
            return Ok(self.waiting());
        }

        let message = format!("Populator pod {namespace}/{pod_name} failed after {count} restarts, check its logs");
        warn!("{}", message);
        self.event(pvc, EventRecord::warning("PopulatorFailed", message.clone())).await;
        Err(PopulatorError::WorkerFailed(message))
    }

    /// Point the shadow's volume at the user PVC.
    async fn hand_over(
        &self,
        pvc: &PersistentVolumeClaim,
        source: &PopulatorSource,
        uid: &str,
    ) -> Result<Action, PopulatorError> {
        let namespace = pvc.namespace().unwrap_or_default();
        let name = pvc.name_any();
        let shadow_name = shadow_pvc_name(uid);
        let Some(shadow) = self.cluster.get_pvc(&namespace, &shadow_name).await? else {
            return Err(PopulatorError::BindConflict(format!(
                "shadow PVC {namespace}/{shadow_name} disappeared before its volume was handed over"
            )));
        };
        let Some(volume) = shadow
            .spec
            .as_ref()
            .and_then(|s| s.volume_name.clone())
            .filter(|v| !v.is_empty())
        else {
            debug!("Shadow PVC {}/{} is not bound yet", namespace, shadow_name);
            return Ok(self.waiting());
        };
        let Some(pv) = self.cluster.get_pv(&volume).await? else {
            return Ok(self.waiting());
        };

        let claim = pv.spec.as_ref().and_then(|s| s.claim_ref.as_ref());
        if let Some(claim) = claim {
            if claim.uid.as_deref() == Some(uid) {
                debug!("PV {} already points at {}/{}, waiting for the bind", volume, namespace, name);
                return Ok(self.waiting());
            }
            let claimed_by_shadow =
                claim.namespace.as_deref() == Some(namespace.as_str()) && claim.name.as_deref() == Some(shadow_name.as_str());
            if !claimed_by_shadow {
                return Err(PopulatorError::BindConflict(format!(
                    "PV {} is claimed by {}/{}",
                    volume,
                    claim.namespace.as_deref().unwrap_or_default(),
                    claim.name.as_deref().unwrap_or_default()
                )));
            }
        }

        let patch = json!({
            "metadata": {
                "annotations": { POPULATED_FROM_ANNOTATION: format!("{}/{}", source.namespace, source.name) }
            },
            "spec": {
                "claimRef": {
                    "apiVersion": "v1",
                    "kind": "PersistentVolumeClaim",
                    "namespace": namespace,
                    "name": name,
                    "uid": uid,
                    "resourceVersion": pvc.resource_version(),
                }
            }
        });
        self.cluster.patch_pv(&volume, &patch).await?;
        info!("Handed PV {} over to PVC {}/{}", volume, namespace, name);
        self.record_progress(pvc, source, 100).await?;
        Ok(self.waiting())
    }

    /// Clean up once the user PVC owns the populated volume.
    async fn finish(&self, pvc: &PersistentVolumeClaim, uid: &str) -> Result<Action, PopulatorError> {
        if !has_finalizer(pvc) {
            return Ok(Action::await_change());
        }
        let namespace = pvc.namespace().unwrap_or_default();
        if let Some(shadow) = self.cluster.get_pvc(&namespace, &shadow_pvc_name(uid)).await? {
            if phase(&shadow) != Some("Lost") {
                debug!("Waiting for shadow PVC {}/{} to release its volume", namespace, shadow.name_any());
                return Ok(self.waiting());
            }
        }
        self.release(pvc, uid).await?;
        info!("Population of PVC {}/{} finished", namespace, pvc.name_any());
        self.event(pvc, EventRecord::normal("PopulatorFinished", "Populator finished")).await;
        Ok(Action::await_change())
    }

    /// Delete the worker and the shadow, then drop the finalizer.
    async fn release(&self, pvc: &PersistentVolumeClaim, uid: &str) -> Result<(), PopulatorError> {
        let namespace = pvc.namespace().unwrap_or_default();
        self.cluster.delete_pod(&namespace, &worker_pod_name(uid)).await?;
        self.cluster.delete_pvc(&namespace, &shadow_pvc_name(uid)).await?;
        self.set_finalizer(pvc, false).await
    }

    async fn set_finalizer(&self, pvc: &PersistentVolumeClaim, want: bool) -> Result<(), PopulatorError> {
        if has_finalizer(pvc) == want {
            return Ok(());
        }
        let mut finalizers: Vec<String> = pvc
            .finalizers()
            .iter()
            .filter(|f| *f != POPULATE_TARGET_FINALIZER)
            .cloned()
            .collect();
        if want {
            finalizers.push(POPULATE_TARGET_FINALIZER.to_string());
        }
        let patch = guarded(pvc, json!({ "metadata": { "finalizers": finalizers } }));
        self.cluster
            .patch_pvc(&pvc.namespace().unwrap_or_default(), &pvc.name_any(), &patch)
            .await
    }
}
