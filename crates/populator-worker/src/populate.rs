//! One populate run
//!
//! oVirt and OpenStack sources are streamed. vSphere disks use the array
//! offload driver registered for the vendor, falling back to streaming from
//! the ESXi file service when none is available. A sync run always streams,
//! since it compares against the volume already in place.

use crate::args::{Job, Mode, Source};
use crate::copy::{copy_stream, sync_stream};
use crate::error::WorkerError;
use crate::metrics::WorkerMetrics;
use inventory_client::transfer;
use inventory_client::{
    DiskStream, HostBinding, OffloadCredentials, OffloadDriver, OffloadError, OffloadRegistry, SourceCredentials, TargetVolume,
};
use prometheus::IntGauge;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Drive an offload session to completion, finalizing it even when the copy fails.
pub async fn offload_copy(
    driver: Arc<dyn OffloadDriver>,
    source_disk: &str,
    target: TargetVolume,
    progress: &IntGauge,
) -> Result<(), WorkerError> {
    let session = driver.prepare(source_disk, &target).await?;
    info!("Offload session {} prepared on {}", session.id, driver.vendor());

    let copied = async {
        let mut updates = driver.copy(&session).await?;
        let mut last = 0u8;
        while let Some(p) = updates.recv().await {
            last = p.min(100);
            progress.set(i64::from(last));
        }
        Ok::<u8, WorkerError>(last)
    }
    .await;

    let session_id = session.id.clone();
    let finalized = driver.finalize(session).await;
    let last = copied?;
    finalized?;
    if last < 100 {
        return Err(OffloadError::Copy(format!("session {session_id} stopped at {last}%")).into());
    }
    Ok(())
}

/// Host part of an endpoint URL.
fn endpoint_host(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

fn host_binding(creds: &OffloadCredentials) -> HostBinding {
    HostBinding {
        host_id: String::new(),
        ip_address: endpoint_host(&creds.url).to_string(),
        user: creds.user.clone(),
        password: creds.password.clone(),
        insecure_skip_verify: creds.insecure_skip_verify,
        cacert: creds.cacert.clone(),
    }
}

/// Host binding from plain host credentials (`user`, `password`, `url`).
fn source_binding(creds: &SourceCredentials) -> Result<HostBinding, WorkerError> {
    let (user, password) = creds.basic()?;
    let url = creds
        .url
        .as_deref()
        .ok_or_else(|| WorkerError::InvalidArgs("secret has no url".to_string()))?;
    Ok(HostBinding {
        host_id: String::new(),
        ip_address: endpoint_host(url).to_string(),
        user: user.to_string(),
        password: password.to_string(),
        insecure_skip_verify: creds.insecure_skip_verify,
        cacert: creds.cacert.clone(),
    })
}

/// Write `stream` into the job's target the way its mode asks.
async fn write(job: &Job, stream: DiskStream, progress: &IntGauge) -> Result<(), WorkerError> {
    match job.mode {
        Mode::Populate => {
            copy_stream(stream, &job.target, job.pvc_size, progress).await?;
        }
        Mode::Sync => {
            sync_stream(stream, &job.target, job.pvc_size, progress).await?;
        }
    }
    Ok(())
}

/// Run `job` with credentials from `env` (the mounted secret).
pub async fn run(
    job: &Job,
    env: &BTreeMap<String, String>,
    registry: &OffloadRegistry,
    metrics: &WorkerMetrics,
) -> Result<(), WorkerError> {
    let progress = metrics.progress(job.source.id());
    info!(
        "{} {} from {} {} into {}",
        match job.mode {
            Mode::Populate => "Populating",
            Mode::Sync => "Syncing",
        },
        job.cr_name,
        job.source.kind(),
        job.source.id(),
        job.target.display()
    );
    match &job.source {
        Source::Ovirt { engine_url, disk_id } => {
            let creds = SourceCredentials::from_map(env);
            let stream = transfer::open_ovirt_disk(engine_url, &creds, disk_id).await?;
            write(job, stream, &progress).await?;
        }
        Source::Openstack { endpoint, image_id } => {
            let mut creds = SourceCredentials::from_map(env);
            creds.url = Some(endpoint.clone());
            let stream = transfer::open_openstack_image(&creds, image_id).await?;
            write(job, stream, &progress).await?;
        }
        Source::VsphereXcopy {
            source_vmdk,
            vendor: Some(vendor),
            ..
        } => match registry.get(*vendor).filter(|_| job.mode == Mode::Populate) {
            Some(driver) => {
                let target = TargetVolume {
                    pv_name: job.target_pvc.clone(),
                    ..Default::default()
                };
                offload_copy(driver, source_vmdk, target, &progress).await?;
            }
            None => {
                if job.mode == Mode::Populate {
                    warn!("No offload driver for {}, streaming from the host", vendor);
                }
                let creds = OffloadCredentials::from_map(env)?.resolve_cacert()?;
                let stream = transfer::open_vsphere_disk(source_vmdk, &host_binding(&creds)).await?;
                write(job, stream, &progress).await?;
            }
        },
        Source::VsphereXcopy {
            source_vmdk, vendor: None, ..
        } => {
            let creds = SourceCredentials::from_map(env);
            let binding = source_binding(&creds)?;
            let stream = transfer::open_vsphere_disk(source_vmdk, &binding).await?;
            write(job, stream, &progress).await?;
        }
    }
    info!("Finished {}", job.cr_name);
    Ok(())
}
