//! In-memory cluster and progress source for reconciler tests

use crate::cluster::{EventRecord, PopulatorCluster};
use crate::error::PopulatorError;
use crate::progress::ProgressSource;
use async_trait::async_trait;
use crds::PopulatorKind;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// RFC 7386 merge of `patch` into `target`
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn patched<T: serde::Serialize + serde::de::DeserializeOwned>(object: &T, patch: &Value) -> T {
    let mut value = serde_json::to_value(object).unwrap();
    merge(&mut value, patch);
    serde_json::from_value(value).unwrap()
}

/// Mock cluster for testing
#[derive(Clone, Default)]
pub struct MockPopulatorCluster {
    pub pvcs: Arc<Mutex<HashMap<String, PersistentVolumeClaim>>>,
    pub pvs: Arc<Mutex<HashMap<String, PersistentVolume>>>,
    pub storage_classes: Arc<Mutex<HashMap<String, StorageClass>>>,
    pub pods: Arc<Mutex<HashMap<String, Pod>>>,
    pub populators: Arc<Mutex<HashMap<String, (PopulatorKind, Value)>>>,
    pub events: Arc<Mutex<Vec<(String, EventRecord)>>>,
    /// Mutating calls, in order (`create pod target/populate-u-1`, ...)
    pub journal: Arc<Mutex<Vec<String>>>,
}

impl MockPopulatorCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.reason.clone()).collect()
    }

    pub fn add_pvc(&self, pvc: PersistentVolumeClaim) {
        let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
        let name = pvc.metadata.name.clone().unwrap_or_default();
        self.pvcs.lock().unwrap().insert(key(&namespace, &name), pvc);
    }

    pub fn pvc(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.pvcs.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn add_pv(&self, pv: PersistentVolume) {
        let name = pv.metadata.name.clone().unwrap_or_default();
        self.pvs.lock().unwrap().insert(name, pv);
    }

    pub fn pv(&self, name: &str) -> Option<PersistentVolume> {
        self.pvs.lock().unwrap().get(name).cloned()
    }

    pub fn add_storage_class(&self, class: StorageClass) {
        let name = class.metadata.name.clone().unwrap_or_default();
        self.storage_classes.lock().unwrap().insert(name, class);
    }

    pub fn add_populator(&self, kind: PopulatorKind, object: Value) {
        let namespace = object["metadata"]["namespace"].as_str().unwrap_or_default().to_string();
        let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.populators.lock().unwrap().insert(key(&namespace, &name), (kind, object));
    }

    pub fn populator(&self, namespace: &str, name: &str) -> Option<Value> {
        self.populators.lock().unwrap().get(&key(namespace, name)).map(|(_, v)| v.clone())
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// Apply `f` to a stored pod, as the kubelet would
    pub fn update_pod(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Pod)) {
        if let Some(pod) = self.pods.lock().unwrap().get_mut(&key(namespace, name)) {
            f(pod);
        }
    }

    /// Apply `f` to a stored PVC, as the binding controller would
    pub fn update_pvc(&self, namespace: &str, name: &str, f: impl FnOnce(&mut PersistentVolumeClaim)) {
        if let Some(pvc) = self.pvcs.lock().unwrap().get_mut(&key(namespace, name)) {
            f(pvc);
        }
    }
}

#[async_trait]
impl PopulatorCluster for MockPopulatorCluster {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, PopulatorError> {
        Ok(self.pvc(namespace, name))
    }

    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<(), PopulatorError> {
        let namespace = pvc.metadata.namespace.clone().unwrap_or_default();
        let name = pvc.metadata.name.clone().unwrap_or_default();
        self.log(format!("create pvc {}", key(&namespace, &name)));
        self.pvcs
            .lock()
            .unwrap()
            .entry(key(&namespace, &name))
            .or_insert_with(|| pvc.clone());
        Ok(())
    }

    async fn patch_pvc(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), PopulatorError> {
        let mut pvcs = self.pvcs.lock().unwrap();
        let Some(pvc) = pvcs.get_mut(&key(namespace, name)) else {
            return Err(PopulatorError::Conflict(format!("pvc {} is gone", key(namespace, name))));
        };
        let expected = patch["metadata"]["resourceVersion"].as_str();
        if expected.is_some() && expected != pvc.metadata.resource_version.as_deref() {
            return Err(PopulatorError::Conflict(format!("pvc {}", key(namespace, name))));
        }
        *pvc = patched(pvc, patch);
        let version = pvc
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        pvc.metadata.resource_version = Some((version + 1).to_string());
        drop(pvcs);
        self.log(format!("patch pvc {}", key(namespace, name)));
        Ok(())
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), PopulatorError> {
        if self.pvcs.lock().unwrap().remove(&key(namespace, name)).is_some() {
            self.log(format!("delete pvc {}", key(namespace, name)));
        }
        Ok(())
    }

    async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>, PopulatorError> {
        Ok(self.pv(name))
    }

    async fn patch_pv(&self, name: &str, patch: &Value) -> Result<(), PopulatorError> {
        let mut pvs = self.pvs.lock().unwrap();
        if let Some(pv) = pvs.get_mut(name) {
            *pv = patched(pv, patch);
        }
        drop(pvs);
        self.log(format!("patch pv {name}"));
        Ok(())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>, PopulatorError> {
        Ok(self.storage_classes.lock().unwrap().get(name).cloned())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, PopulatorError> {
        Ok(self.pod(namespace, name))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), PopulatorError> {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.log(format!("create pod {}", key(&namespace, &name)));
        self.pods
            .lock()
            .unwrap()
            .entry(key(&namespace, &name))
            .or_insert_with(|| pod.clone());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), PopulatorError> {
        if self.pods.lock().unwrap().remove(&key(namespace, name)).is_some() {
            self.log(format!("delete pod {}", key(namespace, name)));
        }
        Ok(())
    }

    async fn get_populator(
        &self,
        kind: PopulatorKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, PopulatorError> {
        Ok(self
            .populators
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .filter(|(k, _)| *k == kind)
            .map(|(_, v)| v.clone()))
    }

    async fn patch_populator_status(
        &self,
        kind: PopulatorKind,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<(), PopulatorError> {
        if let Some((_, object)) = self.populators.lock().unwrap().get_mut(&key(namespace, name)) {
            merge(object, &serde_json::json!({ "status": status }));
        }
        self.log(format!("patch {kind} status {}", key(namespace, name)));
        Ok(())
    }

    async fn publish_event(&self, object: &ObjectReference, event: EventRecord) -> Result<(), PopulatorError> {
        let target = key(
            object.namespace.as_deref().unwrap_or_default(),
            object.name.as_deref().unwrap_or_default(),
        );
        self.events.lock().unwrap().push((target, event));
        Ok(())
    }
}

/// Serves fixed metrics text per URL
#[derive(Clone, Default)]
pub struct MockProgress {
    pub responses: Arc<Mutex<HashMap<String, String>>>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockProgress {
    pub fn set(&self, url: &str, text: &str) {
        self.responses.lock().unwrap().insert(url.to_string(), text.to_string());
    }
}

#[async_trait]
impl ProgressSource for MockProgress {
    async fn fetch(&self, url: &str) -> Result<String, PopulatorError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PopulatorError::Scrape(format!("{url} refused the connection")))
    }
}
