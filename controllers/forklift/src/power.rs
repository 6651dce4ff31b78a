//! Source VM power control
//!
//! Only oVirt exposes a power action the controller calls directly. For other
//! platforms the caller gets [`ControllerError::Unsupported`] and waits for
//! the inventory to report the VM powered off.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::{Provider, ProviderType};
use inventory_client::SourceCredentials;
use inventory_client::common::build_client;
use std::time::Duration;
use tracing::info;

#[async_trait]
pub trait PowerManager: Send + Sync {
    async fn power_off(
        &self,
        provider: &Provider,
        credentials: &SourceCredentials,
        vm_id: &str,
    ) -> Result<(), ControllerError>;
}

/// Power actions over the platform REST APIs
#[derive(Debug, Default)]
pub struct RestPowerManager;

/// oVirt `stop` action URL for a VM.
pub fn ovirt_stop_url(engine_url: &str, vm_id: &str) -> String {
    format!("{}/vms/{}/stop", engine_url.trim_end_matches('/'), vm_id)
}

#[async_trait]
impl PowerManager for RestPowerManager {
    async fn power_off(
        &self,
        provider: &Provider,
        credentials: &SourceCredentials,
        vm_id: &str,
    ) -> Result<(), ControllerError> {
        match provider.spec.type_ {
            ProviderType::Ovirt => {
                let (user, password) = credentials.basic()?;
                let client = build_client(&credentials.tls(), Some(Duration::from_secs(60)))?;
                let url = ovirt_stop_url(&provider.spec.url, vm_id);
                info!("Stopping oVirt VM {}", vm_id);
                client
                    .post(&url)
                    .basic_auth(user, Some(password))
                    .header("Accept", "application/json")
                    .json(&serde_json::json!({}))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(())
            }
            other => Err(ControllerError::Unsupported(format!("power off on {other}"))),
        }
    }
}
