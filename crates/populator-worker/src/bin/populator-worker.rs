//! Populator worker entry point

use anyhow::Context;
use clap::Parser;
use inventory_client::OffloadRegistry;
use populator_worker::{Args, WorkerMetrics, metrics};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let job = args.job().context("invalid worker arguments")?;
    info!(cr = %job.cr_name, namespace = %job.cr_namespace, "Starting populator worker");

    let metrics = Arc::new(WorkerMetrics::new(job.source.kind())?);
    let server = tokio::spawn(metrics::serve(Arc::clone(&metrics), job.metrics_port));

    // Vendor array drivers register here.
    let registry = OffloadRegistry::new();
    let env: BTreeMap<String, String> = std::env::vars().collect();

    let result = populator_worker::run(&job, &env, &registry, &metrics).await;
    server.abort();
    if let Err(e) = &result {
        error!(retriable = e.is_retriable(), "Populate failed: {}", e);
    }
    result.with_context(|| format!("populating {}/{}", job.cr_namespace, job.cr_name))
}
