//! Kubernetes access for the populator reconciler.
//!
//! [`PopulatorCluster`] covers the objects one population touches: the user
//! PVC, its shadow PVC and PV, the worker pod, the storage class and the
//! populator request. [`KubeCluster`] is the live implementation.

use crate::error::PopulatorError;
use async_trait::async_trait;
use crds::{API_GROUP, API_VERSION, PopulatorKind};
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::Client;
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use serde_json::Value;
use tracing::debug;

/// Controller name reported on events
pub const CONTROLLER_NAME: &str = "volume-populator";

/// A Kubernetes event to publish against an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

impl EventRecord {
    pub fn normal(reason: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            warning: false,
            reason: reason.into(),
            note: note.into(),
        }
    }

    pub fn warning(reason: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            warning: true,
            reason: reason.into(),
            note: note.into(),
        }
    }
}

#[async_trait]
pub trait PopulatorCluster: Send + Sync {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, PopulatorError>;
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<(), PopulatorError>;
    /// JSON merge patch on a PVC; a stale `metadata.resourceVersion` in the
    /// patch yields `Conflict`
    async fn patch_pvc(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), PopulatorError>;
    /// Delete a PVC; missing is not an error
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), PopulatorError>;

    async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>, PopulatorError>;
    async fn patch_pv(&self, name: &str, patch: &Value) -> Result<(), PopulatorError>;

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, PopulatorError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, PopulatorError>;
    async fn create_pod(&self, pod: &Pod) -> Result<(), PopulatorError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), PopulatorError>;

    async fn get_populator(&self, kind: PopulatorKind, namespace: &str, name: &str)
        -> Result<Option<Value>, PopulatorError>;
    /// Merge `status` into the populator request's status subresource
    async fn patch_populator_status(
        &self,
        kind: PopulatorKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), PopulatorError>;

    async fn publish_event(&self, object: &ObjectReference, event: EventRecord) -> Result<(), PopulatorError>;
}

/// Dynamic API resource of a populator kind
pub fn populator_resource(kind: PopulatorKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(API_GROUP, API_VERSION, kind.kind());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

fn is_status(e: &kube::Error, code: u16) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == code)
}

/// Live cluster access
pub struct KubeCluster {
    client: Client,
    recorder: Recorder,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
        }
    }

    fn pvcs(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn populators(&self, kind: PopulatorKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &populator_resource(kind))
    }
}

#[async_trait]
impl PopulatorCluster for KubeCluster {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, PopulatorError> {
        Ok(self.pvcs(namespace).get_opt(name).await?)
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<(), PopulatorError> {
        let namespace = pvc.metadata.namespace.as_deref().unwrap_or("default");
        match self.pvcs(namespace).create(&PostParams::default(), pvc).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_pvc(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), PopulatorError> {
        match self.pvcs(namespace).patch(name, &PatchParams::default(), &Patch::Merge(patch)).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Err(PopulatorError::Conflict(format!("pvc {namespace}/{name}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), PopulatorError> {
        match self.pvcs(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>, PopulatorError> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn patch_pv(&self, name: &str, patch: &Value) -> Result<(), PopulatorError> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        Ok(())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, PopulatorError> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, PopulatorError> {
        Ok(self.pods(namespace).get_opt(name).await?)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), PopulatorError> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        match self.pods(namespace).create(&PostParams::default(), pod).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), PopulatorError> {
        match self.pods(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_populator(
        &self,
        kind: PopulatorKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, PopulatorError> {
        let object = self.populators(kind, namespace).get_opt(name).await?;
        object.map(serde_json::to_value).transpose().map_err(Into::into)
    }

    async fn patch_populator_status(
        &self,
        kind: PopulatorKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), PopulatorError> {
        debug!("Patching {} {}/{} status", kind, namespace, name);
        let patch = serde_json::json!({ "status": status });
        self.populators(kind, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn publish_event(&self, object: &ObjectReference, event: EventRecord) -> Result<(), PopulatorError> {
        let event = Event {
            type_: if event.warning { EventType::Warning } else { EventType::Normal },
            action: event.reason.clone(),
            reason: event.reason,
            note: Some(event.note),
            secondary: None,
        };
        self.recorder.publish(&event, object).await?;
        Ok(())
    }
}
