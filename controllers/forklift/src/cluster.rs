//! Kubernetes access for the reconcilers.
//!
//! Reconcilers talk to the cluster only through [`ClusterClient`] so that they
//! can run against [`crate::mock::MockCluster`] in tests. [`KubeCluster`] is
//! the live implementation: typed `Api<T>` for our CRDs and core objects,
//! `DynamicObject` for populator requests, CDI and KubeVirt objects and NADs.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{API_GROUP, API_VERSION, Host, Migration, NetworkMap, Plan, PopulatorKind, Provider, StorageMap};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use mapping::{TargetNetwork, TargetStorageClass};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

/// Controller name reported on events
pub const CONTROLLER_NAME: &str = "forklift-controller";

/// Our namespaced custom resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Provider,
    Host,
    NetworkMap,
    StorageMap,
    Plan,
    Migration,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provider => "Provider",
            Self::Host => "Host",
            Self::NetworkMap => "NetworkMap",
            Self::StorageMap => "StorageMap",
            Self::Plan => "Plan",
            Self::Migration => "Migration",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CDI and KubeVirt kinds created for a VM besides the VirtualMachine itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalKind {
    DataVolume,
    VirtualMachineInstanceMigration,
}

impl ExternalKind {
    pub fn kind(self) -> &'static str {
        match self {
            Self::DataVolume => "DataVolume",
            Self::VirtualMachineInstanceMigration => "VirtualMachineInstanceMigration",
        }
    }

    pub fn api_version(self) -> &'static str {
        match self {
            Self::DataVolume => "cdi.kubevirt.io/v1beta1",
            Self::VirtualMachineInstanceMigration => "kubevirt.io/v1",
        }
    }

    pub fn resource(self) -> ApiResource {
        let gvk = match self {
            Self::DataVolume => GroupVersionKind::gvk("cdi.kubevirt.io", "v1beta1", self.kind()),
            Self::VirtualMachineInstanceMigration => GroupVersionKind::gvk("kubevirt.io", "v1", self.kind()),
        };
        let plural = match self {
            Self::DataVolume => "datavolumes",
            Self::VirtualMachineInstanceMigration => "virtualmachineinstancemigrations",
        };
        ApiResource::from_gvk_with_plural(&gvk, plural)
    }
}

impl std::fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

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

/// Cluster operations used by the reconcilers
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>, ControllerError>;
    async fn get_plan(&self, namespace: &str, name: &str) -> Result<Option<Plan>, ControllerError>;
    async fn get_network_map(&self, namespace: &str, name: &str) -> Result<Option<NetworkMap>, ControllerError>;
    async fn get_storage_map(&self, namespace: &str, name: &str) -> Result<Option<StorageMap>, ControllerError>;
    async fn list_migrations(&self, namespace: &str) -> Result<Vec<Migration>, ControllerError>;
    async fn list_hosts(&self, namespace: &str) -> Result<Vec<Host>, ControllerError>;
    async fn create_network_map(&self, map: &NetworkMap) -> Result<NetworkMap, ControllerError>;
    async fn create_storage_map(&self, map: &StorageMap) -> Result<StorageMap, ControllerError>;

    /// Merge-patch the object itself (metadata or spec).
    async fn patch_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), ControllerError>;

    /// Merge-patch the status subresource with `{"status": status}`.
    async fn patch_status(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), ControllerError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError>;
    async fn list_secrets(&self, namespace: &str, selector: &str) -> Result<Vec<Secret>, ControllerError>;
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError>;
    /// Replace with optimistic concurrency; a stale resourceVersion yields `Conflict`.
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ControllerError>;

    async fn list_storage_classes(&self) -> Result<Vec<TargetStorageClass>, ControllerError>;
    async fn list_network_attachment_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<TargetNetwork>, ControllerError>;

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, ControllerError>;
    async fn list_pvcs(&self, namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>, ControllerError>;
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ControllerError>;
    async fn patch_pvc(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError>;
    /// Delete; an absent claim is not an error.
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    /// Create a populator request; an existing one is left alone.
    async fn create_populator(&self, kind: PopulatorKind, namespace: &str, object: &Value) -> Result<(), ControllerError>;
    async fn get_populator(&self, kind: PopulatorKind, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError>;
    async fn delete_populator(&self, kind: PopulatorKind, namespace: &str, name: &str) -> Result<(), ControllerError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError>;
    async fn create_pod(&self, pod: &Pod) -> Result<(), ControllerError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError>;

    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError>;
    async fn create_virtual_machine(&self, namespace: &str, object: &Value) -> Result<(), ControllerError>;

    /// Create a CDI or KubeVirt object; an existing one is left alone.
    async fn create_object(&self, kind: ExternalKind, namespace: &str, object: &Value) -> Result<(), ControllerError>;
    async fn get_object(&self, kind: ExternalKind, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError>;
    /// Delete; an absent object is not an error.
    async fn delete_object(&self, kind: ExternalKind, namespace: &str, name: &str) -> Result<(), ControllerError>;

    async fn publish_event(&self, object: &ObjectReference, event: EventRecord) -> Result<(), ControllerError>;
}

/// API resource of a populator request kind
pub fn populator_resource(kind: PopulatorKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(API_GROUP, API_VERSION, kind.kind());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

/// KubeVirt `VirtualMachine`
pub fn virtual_machine_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("kubevirt.io", "v1", "VirtualMachine");
    ApiResource::from_gvk_with_plural(&gvk, "virtualmachines")
}

/// Multus `NetworkAttachmentDefinition`
pub fn network_attachment_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("k8s.cni.cncf.io", "v1", "NetworkAttachmentDefinition");
    ApiResource::from_gvk_with_plural(&gvk, "network-attachment-definitions")
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

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn dynamic(&self, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

async fn merge_patch<K>(api: Api<K>, name: &str, patch: &Value, status: bool) -> Result<(), ControllerError>
where
    K: Clone + DeserializeOwned + Debug,
{
    let params = PatchParams::default();
    if status {
        api.patch_status(name, &params, &Patch::Merge(patch)).await?;
    } else {
        api.patch(name, &params, &Patch::Merge(patch)).await?;
    }
    Ok(())
}

impl KubeCluster {
    async fn patch_kind(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
        status: bool,
    ) -> Result<(), ControllerError> {
        debug!("Patching {} {}/{} (status: {})", kind, namespace, name, status);
        match kind {
            ResourceKind::Provider => merge_patch(self.api::<Provider>(namespace), name, patch, status).await,
            ResourceKind::Host => merge_patch(self.api::<Host>(namespace), name, patch, status).await,
            ResourceKind::NetworkMap => merge_patch(self.api::<NetworkMap>(namespace), name, patch, status).await,
            ResourceKind::StorageMap => merge_patch(self.api::<StorageMap>(namespace), name, patch, status).await,
            ResourceKind::Plan => merge_patch(self.api::<Plan>(namespace), name, patch, status).await,
            ResourceKind::Migration => merge_patch(self.api::<Migration>(namespace), name, patch, status).await,
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>, ControllerError> {
        Ok(self.api::<Provider>(namespace).get_opt(name).await?)
    }

    async fn get_plan(&self, namespace: &str, name: &str) -> Result<Option<Plan>, ControllerError> {
        Ok(self.api::<Plan>(namespace).get_opt(name).await?)
    }

    async fn get_network_map(&self, namespace: &str, name: &str) -> Result<Option<NetworkMap>, ControllerError> {
        Ok(self.api::<NetworkMap>(namespace).get_opt(name).await?)
    }

    async fn get_storage_map(&self, namespace: &str, name: &str) -> Result<Option<StorageMap>, ControllerError> {
        Ok(self.api::<StorageMap>(namespace).get_opt(name).await?)
    }

    async fn list_migrations(&self, namespace: &str) -> Result<Vec<Migration>, ControllerError> {
        Ok(self.api::<Migration>(namespace).list(&ListParams::default()).await?.items)
    }

    async fn list_hosts(&self, namespace: &str) -> Result<Vec<Host>, ControllerError> {
        Ok(self.api::<Host>(namespace).list(&ListParams::default()).await?.items)
    }

    async fn create_network_map(&self, map: &NetworkMap) -> Result<NetworkMap, ControllerError> {
        let namespace = map.metadata.namespace.as_deref().unwrap_or("default");
        Ok(self.api::<NetworkMap>(namespace).create(&PostParams::default(), map).await?)
    }

    async fn create_storage_map(&self, map: &StorageMap) -> Result<StorageMap, ControllerError> {
        let namespace = map.metadata.namespace.as_deref().unwrap_or("default");
        Ok(self.api::<StorageMap>(namespace).create(&PostParams::default(), map).await?)
    }

    async fn patch_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), ControllerError> {
        self.patch_kind(kind, namespace, name, patch, false).await
    }

    async fn patch_status(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({ "status": status });
        self.patch_kind(kind, namespace, name, &patch, true).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.api::<Secret>(namespace).get_opt(name).await?)
    }

    async fn list_secrets(&self, namespace: &str, selector: &str) -> Result<Vec<Secret>, ControllerError> {
        let params = ListParams::default().labels(selector);
        Ok(self.api::<Secret>(namespace).list(&params).await?.items)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or("default");
        Ok(self.api::<Secret>(namespace).create(&PostParams::default(), secret).await?)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or("default");
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        match self.api::<Secret>(namespace).replace(name, &PostParams::default(), secret).await {
            Ok(updated) => Ok(updated),
            Err(e) if is_status(&e, 409) => Err(ControllerError::Conflict(format!("secret {namespace}/{name}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_storage_classes(&self) -> Result<Vec<TargetStorageClass>, ControllerError> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        let classes = api.list(&ListParams::default()).await?.items;
        Ok(classes
            .iter()
            .filter_map(|class| {
                let name = class.metadata.name.clone()?;
                let annotations = class.metadata.annotations.clone().unwrap_or_default();
                Some(TargetStorageClass::from_annotations(name, annotations.iter()))
            })
            .collect())
    }

    async fn list_network_attachment_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<TargetNetwork>, ControllerError> {
        let api = self.dynamic(namespace, &network_attachment_resource());
        let nads = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            // Multus not installed
            Err(e) if is_status(&e, 404) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(nads
            .into_iter()
            .filter_map(|nad| {
                Some(TargetNetwork {
                    namespace: nad.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
                    name: nad.metadata.name?,
                })
            })
            .collect())
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, ControllerError> {
        Ok(self.api::<PersistentVolumeClaim>(namespace).get_opt(name).await?)
    }

    async fn list_pvcs(&self, namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>, ControllerError> {
        let params = ListParams::default().labels(selector);
        Ok(self.api::<PersistentVolumeClaim>(namespace).list(&params).await?.items)
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ControllerError> {
        let namespace = pvc.metadata.namespace.as_deref().unwrap_or("default");
        Ok(self
            .api::<PersistentVolumeClaim>(namespace)
            .create(&PostParams::default(), pvc)
            .await?)
    }

    async fn patch_pvc(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        merge_patch(self.api::<PersistentVolumeClaim>(namespace), name, patch, false).await
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        match self
            .api::<PersistentVolumeClaim>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_populator(&self, kind: PopulatorKind, namespace: &str, object: &Value) -> Result<(), ControllerError> {
        let resource = populator_resource(kind);
        let object: DynamicObject = serde_json::from_value(object.clone())?;
        match self.dynamic(namespace, &resource).create(&PostParams::default(), &object).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => {
                debug!("{} {}/{} already exists", kind, namespace, object.metadata.name.unwrap_or_default());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_populator(&self, kind: PopulatorKind, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError> {
        let object = self.dynamic(namespace, &populator_resource(kind)).get_opt(name).await?;
        object.map(serde_json::to_value).transpose().map_err(Into::into)
    }

    async fn delete_populator(&self, kind: PopulatorKind, namespace: &str, name: &str) -> Result<(), ControllerError> {
        match self
            .dynamic(namespace, &populator_resource(kind))
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError> {
        Ok(self.api::<Pod>(namespace).get_opt(name).await?)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        match self.api::<Pod>(namespace).create(&PostParams::default(), pod).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        match self.api::<Pod>(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError> {
        let object = self.dynamic(namespace, &virtual_machine_resource()).get_opt(name).await?;
        object.map(serde_json::to_value).transpose().map_err(Into::into)
    }

    async fn create_virtual_machine(&self, namespace: &str, object: &Value) -> Result<(), ControllerError> {
        let object: DynamicObject = serde_json::from_value(object.clone())?;
        match self
            .dynamic(namespace, &virtual_machine_resource())
            .create(&PostParams::default(), &object)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_object(&self, kind: ExternalKind, namespace: &str, object: &Value) -> Result<(), ControllerError> {
        let object: DynamicObject = serde_json::from_value(object.clone())?;
        match self
            .dynamic(namespace, &kind.resource())
            .create(&PostParams::default(), &object)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => {
                debug!("{} {}/{} already exists", kind, namespace, object.metadata.name.unwrap_or_default());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_object(&self, kind: ExternalKind, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError> {
        let object = self.dynamic(namespace, &kind.resource()).get_opt(name).await?;
        object.map(serde_json::to_value).transpose().map_err(Into::into)
    }

    async fn delete_object(&self, kind: ExternalKind, namespace: &str, name: &str) -> Result<(), ControllerError> {
        match self
            .dynamic(namespace, &kind.resource())
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish_event(&self, object: &ObjectReference, event: EventRecord) -> Result<(), ControllerError> {
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
