//! In-memory cluster for reconciler tests

use crate::cluster::{ClusterClient, EventRecord, ExternalKind, ResourceKind};
use crate::error::ControllerError;
use crate::inventory::AdapterFactory;
use crate::power::PowerManager;
use async_trait::async_trait;
use crds::{Host, Migration, NetworkMap, Plan, PopulatorKind, Provider, StorageMap};
use inventory_client::{MockSourceAdapter, SourceAdapter, SourceCredentials};
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolumeClaim, Pod, Secret};
use mapping::{TargetNetwork, TargetStorageClass};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn key_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> String {
    key(
        meta.namespace.as_deref().unwrap_or("default"),
        meta.name.as_deref().unwrap_or_default(),
    )
}

fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|l| l.get(k)).is_some_and(|actual| actual == v),
            None => false,
        })
}

/// Mock cluster for testing
#[derive(Clone, Default)]
pub struct MockCluster {
    pub providers: Arc<Mutex<HashMap<String, Provider>>>,
    pub plans: Arc<Mutex<HashMap<String, Plan>>>,
    pub network_maps: Arc<Mutex<HashMap<String, NetworkMap>>>,
    pub storage_maps: Arc<Mutex<HashMap<String, StorageMap>>>,
    pub migrations: Arc<Mutex<HashMap<String, Migration>>>,
    pub hosts: Arc<Mutex<HashMap<String, Host>>>,
    pub secrets: Arc<Mutex<HashMap<String, Secret>>>,
    pub storage_classes: Arc<Mutex<Vec<TargetStorageClass>>>,
    pub nads: Arc<Mutex<Vec<TargetNetwork>>>,
    pub pvcs: Arc<Mutex<HashMap<String, PersistentVolumeClaim>>>,
    pub populators: Arc<Mutex<HashMap<String, (PopulatorKind, Value)>>>,
    pub pods: Arc<Mutex<HashMap<String, Pod>>>,
    pub virtual_machines: Arc<Mutex<HashMap<String, Value>>>,
    /// CDI and KubeVirt objects per `Kind/namespace/name`
    pub objects: Arc<Mutex<HashMap<String, Value>>>,
    /// Last status written per `Kind/namespace/name`
    pub statuses: Arc<Mutex<HashMap<String, Value>>>,
    /// Every object patch, in order
    pub patches: Arc<Mutex<Vec<(ResourceKind, String, Value)>>>,
    pub events: Arc<Mutex<Vec<(String, EventRecord)>>>,
    /// Mutating calls, in order (`create pvc mtv/x`, `delete pod mtv/y`, ...)
    pub journal: Arc<Mutex<Vec<String>>>,
    /// Number of secret replacements to reject with a conflict
    pub secret_conflicts: Arc<Mutex<usize>>,
    uid_counter: Arc<Mutex<u64>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_uid(&self) -> String {
        let mut counter = self.uid_counter.lock().unwrap();
        *counter += 1;
        format!("uid-{}", *counter)
    }

    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    pub fn add_provider(&self, provider: Provider) {
        self.providers.lock().unwrap().insert(key_of(&provider.metadata), provider);
    }

    pub fn add_plan(&self, plan: Plan) {
        self.plans.lock().unwrap().insert(key_of(&plan.metadata), plan);
    }

    pub fn add_migration(&self, migration: Migration) {
        self.migrations.lock().unwrap().insert(key_of(&migration.metadata), migration);
    }

    pub fn add_host(&self, host: Host) {
        self.hosts.lock().unwrap().insert(key_of(&host.metadata), host);
    }

    pub fn add_network_map(&self, map: NetworkMap) {
        self.network_maps.lock().unwrap().insert(key_of(&map.metadata), map);
    }

    pub fn add_storage_map(&self, map: StorageMap) {
        self.storage_maps.lock().unwrap().insert(key_of(&map.metadata), map);
    }

    pub fn add_secret(&self, mut secret: Secret) {
        secret.metadata.resource_version.get_or_insert_with(|| "1".to_string());
        secret.metadata.uid.get_or_insert_with(|| self.next_uid());
        self.secrets.lock().unwrap().insert(key_of(&secret.metadata), secret);
    }

    pub fn add_storage_class(&self, class: TargetStorageClass) {
        self.storage_classes.lock().unwrap().push(class);
    }

    pub fn add_nad(&self, namespace: &str, name: &str) {
        self.nads.lock().unwrap().push(TargetNetwork {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().insert(key_of(&pod.metadata), pod);
    }

    pub fn status(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Value> {
        self.statuses
            .lock()
            .unwrap()
            .get(&format!("{}/{}", kind, key(namespace, name)))
            .cloned()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn pvc(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.pvcs.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// Set the phase of every claim in `namespace`.
    pub fn set_pvc_phase(&self, namespace: &str, phase: &str) {
        for (k, pvc) in self.pvcs.lock().unwrap().iter_mut() {
            if k.starts_with(&format!("{namespace}/")) {
                pvc.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
            }
        }
    }

    pub fn populator(&self, namespace: &str, name: &str) -> Option<Value> {
        self.populators
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .map(|(_, v)| v.clone())
    }

    pub fn set_populator_progress(&self, namespace: &str, name: &str, progress: &str) {
        if let Some((_, object)) = self.populators.lock().unwrap().get_mut(&key(namespace, name)) {
            object["status"] = serde_json::json!({ "progress": progress });
        }
    }

    pub fn add_pvc(&self, pvc: PersistentVolumeClaim) {
        self.pvcs.lock().unwrap().insert(key_of(&pvc.metadata), pvc);
    }

    pub fn object(&self, kind: ExternalKind, namespace: &str, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{}/{}", kind, key(namespace, name)))
            .cloned()
    }

    pub fn set_object_status(&self, kind: ExternalKind, namespace: &str, name: &str, status: Value) {
        if let Some(object) = self
            .objects
            .lock()
            .unwrap()
            .get_mut(&format!("{}/{}", kind, key(namespace, name)))
        {
            object["status"] = status;
        }
    }

    /// Set the phase of the pod `namespace/name`.
    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) {
        if let Some(pod) = self.pods.lock().unwrap().get_mut(&key(namespace, name)) {
            pod.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
        }
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.reason.clone()).collect()
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get_provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>, ControllerError> {
        Ok(self.providers.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_plan(&self, namespace: &str, name: &str) -> Result<Option<Plan>, ControllerError> {
        Ok(self.plans.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_network_map(&self, namespace: &str, name: &str) -> Result<Option<NetworkMap>, ControllerError> {
        Ok(self.network_maps.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_storage_map(&self, namespace: &str, name: &str) -> Result<Option<StorageMap>, ControllerError> {
        Ok(self.storage_maps.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn list_migrations(&self, namespace: &str) -> Result<Vec<Migration>, ControllerError> {
        Ok(self
            .migrations
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(&format!("{namespace}/")))
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn list_hosts(&self, namespace: &str) -> Result<Vec<Host>, ControllerError> {
        Ok(self
            .hosts
            .lock()
            .unwrap()
            .values()
            .filter(|h| h.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn create_network_map(&self, map: &NetworkMap) -> Result<NetworkMap, ControllerError> {
        let mut map = map.clone();
        map.metadata.uid = Some(self.next_uid());
        self.log(format!("create networkmap {}", key_of(&map.metadata)));
        self.network_maps.lock().unwrap().insert(key_of(&map.metadata), map.clone());
        Ok(map)
    }

    async fn create_storage_map(&self, map: &StorageMap) -> Result<StorageMap, ControllerError> {
        let mut map = map.clone();
        map.metadata.uid = Some(self.next_uid());
        self.log(format!("create storagemap {}", key_of(&map.metadata)));
        self.storage_maps.lock().unwrap().insert(key_of(&map.metadata), map.clone());
        Ok(map)
    }

    async fn patch_resource(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), ControllerError> {
        self.patches
            .lock()
            .unwrap()
            .push((kind, key(namespace, name), patch.clone()));
        // Reflect spec.secret edits so later reads observe them.
        if let (ResourceKind::Provider, Some(secret)) = (kind, patch.pointer("/spec/secret")) {
            let secret = serde_json::from_value(secret.clone())?;
            if let Some(p) = self.providers.lock().unwrap().get_mut(&key(namespace, name)) {
                p.spec.secret = secret;
            }
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), ControllerError> {
        self.statuses
            .lock()
            .unwrap()
            .insert(format!("{}/{}", kind, key(namespace, name)), status.clone());
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ControllerError> {
        Ok(self.secret(namespace, name))
    }

    async fn list_secrets(&self, namespace: &str, selector: &str) -> Result<Vec<Secret>, ControllerError> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.metadata.namespace.as_deref() == Some(namespace))
            .filter(|s| selector_matches(selector, s.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        let mut secret = secret.clone();
        if secret.metadata.name.is_none() {
            let prefix = secret.metadata.generate_name.clone().unwrap_or_default();
            secret.metadata.name = Some(format!("{}{}", prefix, self.next_uid()));
        }
        secret.metadata.uid = Some(self.next_uid());
        secret.metadata.resource_version = Some("1".to_string());
        self.log(format!("create secret {}", key_of(&secret.metadata)));
        self.secrets.lock().unwrap().insert(key_of(&secret.metadata), secret.clone());
        Ok(secret)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ControllerError> {
        let k = key_of(&secret.metadata);
        {
            let mut conflicts = self.secret_conflicts.lock().unwrap();
            if *conflicts > 0 {
                *conflicts -= 1;
                // Another writer got there first.
                if let Some(stored) = self.secrets.lock().unwrap().get_mut(&k) {
                    let version: u64 = stored.metadata.resource_version.as_deref().unwrap_or("1").parse().unwrap_or(1);
                    stored.metadata.resource_version = Some((version + 1).to_string());
                }
                return Err(ControllerError::Conflict(format!("secret {k}")));
            }
        }
        let mut secrets = self.secrets.lock().unwrap();
        let stored = secrets
            .get(&k)
            .ok_or_else(|| ControllerError::NotFound(format!("secret {k}")))?;
        if stored.metadata.resource_version != secret.metadata.resource_version {
            return Err(ControllerError::Conflict(format!("secret {k}")));
        }
        let version: u64 = stored.metadata.resource_version.as_deref().unwrap_or("1").parse().unwrap_or(1);
        let mut updated = secret.clone();
        updated.metadata.resource_version = Some((version + 1).to_string());
        secrets.insert(k.clone(), updated.clone());
        self.log(format!("replace secret {k}"));
        Ok(updated)
    }

    async fn list_storage_classes(&self) -> Result<Vec<TargetStorageClass>, ControllerError> {
        Ok(self.storage_classes.lock().unwrap().clone())
    }

    async fn list_network_attachment_definitions(
        &self,
        namespace: &str,
    ) -> Result<Vec<TargetNetwork>, ControllerError> {
        Ok(self
            .nads
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, ControllerError> {
        Ok(self.pvc(namespace, name))
    }

    async fn list_pvcs(&self, namespace: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>, ControllerError> {
        Ok(self
            .pvcs
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| selector_matches(selector, p.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ControllerError> {
        let mut pvc = pvc.clone();
        if pvc.metadata.name.is_none() {
            let prefix = pvc.metadata.generate_name.clone().unwrap_or_default();
            pvc.metadata.name = Some(format!("{}{}", prefix, self.next_uid()));
        }
        pvc.metadata.uid = Some(self.next_uid());
        self.log(format!("create pvc {}", key_of(&pvc.metadata)));
        self.pvcs.lock().unwrap().insert(key_of(&pvc.metadata), pvc.clone());
        Ok(pvc)
    }

    async fn patch_pvc(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), ControllerError> {
        let k = key(namespace, name);
        self.log(format!("patch pvc {k}"));
        if let Some(pvc) = self.pvcs.lock().unwrap().get_mut(&k) {
            if let Some(finalizers) = patch.pointer("/metadata/finalizers") {
                pvc.metadata.finalizers = serde_json::from_value(finalizers.clone())?;
            }
            if let Some(Value::Object(annotations)) = patch.pointer("/metadata/annotations") {
                let stored = pvc.metadata.annotations.get_or_insert_with(BTreeMap::new);
                for (k, v) in annotations {
                    match v.as_str() {
                        Some(v) => stored.insert(k.clone(), v.to_string()),
                        None => stored.remove(k),
                    };
                }
            }
        }
        Ok(())
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        self.log(format!("delete pvc {}", key(namespace, name)));
        self.pvcs.lock().unwrap().remove(&key(namespace, name));
        Ok(())
    }

    async fn create_populator(&self, kind: PopulatorKind, namespace: &str, object: &Value) -> Result<(), ControllerError> {
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let k = key(namespace, &name);
        let mut populators = self.populators.lock().unwrap();
        if !populators.contains_key(&k) {
            self.log(format!("create {} {}", kind, k));
            populators.insert(k, (kind, object.clone()));
        }
        Ok(())
    }

    async fn get_populator(&self, kind: PopulatorKind, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError> {
        Ok(self
            .populators
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .filter(|(k, _)| *k == kind)
            .map(|(_, v)| v.clone()))
    }

    async fn delete_populator(&self, kind: PopulatorKind, namespace: &str, name: &str) -> Result<(), ControllerError> {
        self.log(format!("delete {} {}", kind, key(namespace, name)));
        self.populators.lock().unwrap().remove(&key(namespace, name));
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError> {
        Ok(self.pods.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), ControllerError> {
        self.log(format!("create pod {}", key_of(&pod.metadata)));
        self.pods.lock().unwrap().insert(key_of(&pod.metadata), pod.clone());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        self.log(format!("delete pod {}", key(namespace, name)));
        self.pods.lock().unwrap().remove(&key(namespace, name));
        Ok(())
    }

    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError> {
        Ok(self.virtual_machines.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn create_virtual_machine(&self, namespace: &str, object: &Value) -> Result<(), ControllerError> {
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.log(format!("create virtualmachine {}", key(namespace, name)));
        self.virtual_machines
            .lock()
            .unwrap()
            .insert(key(namespace, name), object.clone());
        Ok(())
    }

    async fn create_object(&self, kind: ExternalKind, namespace: &str, object: &Value) -> Result<(), ControllerError> {
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let k = format!("{}/{}", kind, key(namespace, &name));
        if self.objects.lock().unwrap().contains_key(&k) {
            return Ok(());
        }
        self.log(format!("create {} {}", kind, key(namespace, &name)));
        self.objects.lock().unwrap().insert(k, object.clone());
        // CDI backs every DataVolume with a claim of the same name and labels.
        if kind == ExternalKind::DataVolume {
            let spec = object
                .pointer("/spec/storage")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            let claim = PersistentVolumeClaim {
                metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                    name: Some(name),
                    namespace: Some(namespace.to_string()),
                    labels: object
                        .pointer("/metadata/labels")
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()?,
                    annotations: object
                        .pointer("/metadata/annotations")
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()?,
                    uid: Some(self.next_uid()),
                    ..Default::default()
                },
                spec: Some(serde_json::from_value(spec)?),
                status: None,
            };
            self.pvcs.lock().unwrap().insert(key_of(&claim.metadata), claim);
        }
        Ok(())
    }

    async fn get_object(&self, kind: ExternalKind, namespace: &str, name: &str) -> Result<Option<Value>, ControllerError> {
        Ok(self.object(kind, namespace, name))
    }

    async fn delete_object(&self, kind: ExternalKind, namespace: &str, name: &str) -> Result<(), ControllerError> {
        self.log(format!("delete {} {}", kind, key(namespace, name)));
        self.objects
            .lock()
            .unwrap()
            .remove(&format!("{}/{}", kind, key(namespace, name)));
        Ok(())
    }

    async fn publish_event(&self, object: &ObjectReference, event: EventRecord) -> Result<(), ControllerError> {
        let name = object.name.clone().unwrap_or_default();
        self.events.lock().unwrap().push((name, event));
        Ok(())
    }
}

/// Hands out one preset adapter for every provider
pub struct StaticAdapters {
    pub adapter: Arc<MockSourceAdapter>,
    /// Credentials seen per call
    pub credentials: Arc<Mutex<Vec<SourceCredentials>>>,
}

impl StaticAdapters {
    pub fn new(adapter: MockSourceAdapter) -> Self {
        Self {
            adapter: Arc::new(adapter),
            credentials: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl AdapterFactory for StaticAdapters {
    fn adapter(&self, _provider: &Provider, credentials: SourceCredentials) -> Arc<dyn SourceAdapter> {
        self.credentials.lock().unwrap().push(credentials);
        self.adapter.clone()
    }
}

/// Records power-off requests
#[derive(Default)]
pub struct RecordingPower {
    pub requests: Arc<Mutex<Vec<String>>>,
    pub unsupported: bool,
}

#[async_trait]
impl PowerManager for RecordingPower {
    async fn power_off(
        &self,
        _provider: &Provider,
        _credentials: &SourceCredentials,
        vm_id: &str,
    ) -> Result<(), ControllerError> {
        if self.unsupported {
            return Err(ControllerError::Unsupported("power off".to_string()));
        }
        self.requests.lock().unwrap().push(vm_id.to_string());
        Ok(())
    }
}
