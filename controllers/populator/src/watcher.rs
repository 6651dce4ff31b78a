//! PVC watcher.
//!
//! Runs a `kube_runtime::Controller` over PersistentVolumeClaims. PVCs that
//! name no populator request finish in one cheap pass.

use crate::error::PopulatorError;
use crate::reconciler::Reconciler;
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{Api, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watches PVCs and drives their population.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    pvc_api: Api<PersistentVolumeClaim>,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, pvc_api: Api<PersistentVolumeClaim>) -> Self {
        Self { reconciler, pvc_api }
    }

    pub async fn watch_pvcs(&self) -> Result<(), PopulatorError> {
        info!("Starting PersistentVolumeClaim watcher");

        let error_policy = |pvc: Arc<PersistentVolumeClaim>, error: &PopulatorError, ctx: Arc<Reconciler>| -> Action {
            error!(
                "Reconciliation error for PVC {}/{}: {}",
                pvc.namespace().unwrap_or_default(),
                pvc.name_any(),
                error
            );
            ctx.error_action(error)
        };

        let reconcile = |pvc: Arc<PersistentVolumeClaim>, ctx: Arc<Reconciler>| async move {
            debug!("Reconciling PVC {}/{}", pvc.namespace().unwrap_or_default(), pvc.name_any());
            ctx.reconcile_pvc(&pvc).await
        };

        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(1))
            .concurrency(5);

        Controller::new(self.pvc_api.clone(), watcher::Config::default())
            .with_config(controller_config)
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                if let Err(e) = res {
                    error!("Controller error for PersistentVolumeClaim: {}", e);
                }
            })
            .await;

        Ok(())
    }
}
