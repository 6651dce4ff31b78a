//! Migration Controller
//!
//! Reconciles the VM migration CRDs:
//! - Provider: connection test against the source platform
//! - Host: ESXi host credentials for direct disk transfer
//! - NetworkMap / StorageMap: pair validation against the inventory
//! - Plan: VM resolution, default maps and readiness
//! - Migration: the per-VM pipeline that drives volume populators

mod backoff;
mod cluster;
mod config;
mod controller;
mod error;
mod inventory;
#[cfg(test)]
mod mock;
mod ownership;
mod power;
mod reconciler;
mod test_utils;
mod watcher;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Migration Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Inventory URL: {}", config.inventory_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Restart limit: {}", config.restart_limit);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
