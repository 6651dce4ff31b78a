//! Main controller implementation.

use crate::cluster::KubeCluster;
use crate::config::Config;
use crate::error::PopulatorError;
use crate::progress::HttpProgress;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Runs the PVC watcher.
pub struct Controller {
    pvc_watcher: JoinHandle<Result<(), PopulatorError>>,
}

impl Controller {
    pub async fn new(config: Config) -> Result<Self, PopulatorError> {
        info!("Initializing volume populator controller");

        let kube_client = Client::try_default().await?;
        let pvc_api: Api<PersistentVolumeClaim> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeCluster::new(kube_client)),
            Arc::new(HttpProgress::new()?),
            config,
        ));
        let watcher = Watcher::new(reconciler, pvc_api);
        let pvc_watcher = tokio::spawn(async move { watcher.watch_pvcs().await });

        Ok(Self { pvc_watcher })
    }

    /// Runs the controller until the watcher exits.
    pub async fn run(self) -> Result<(), PopulatorError> {
        info!("Volume populator controller running");
        self.pvc_watcher
            .await
            .map_err(|e| PopulatorError::Watch(format!("PersistentVolumeClaim watcher panicked: {}", e)))?
    }
}
