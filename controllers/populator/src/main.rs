//! Volume Populator Controller
//!
//! Fills PVCs whose `dataSourceRef` names an oVirt, OpenStack or vSphere
//! xcopy populator request, by running a worker pod per PVC and handing the
//! written volume over once the worker succeeds.

mod cluster;
mod config;
mod controller;
mod error;
#[cfg(test)]
mod mock;
mod pod;
mod progress;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
mod watcher;

use crate::config::Config;
use crate::error::PopulatorError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), PopulatorError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Volume Populator Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Restart limit: {}", config.restart_limit);
    info!("  Progress interval: {:?}", config.progress_interval);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
