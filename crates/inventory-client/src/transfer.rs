//! Disk byte transport per platform
//!
//! - oVirt: an imageio download transfer opened through the engine API and
//!   finalized once the stream is drained.
//! - OpenStack: the Glance image file, located through the Keystone catalog.
//! - vSphere: the ESXi `/folder` file service on the host's data interface.
//! - OVA: the disk file on the mounted export.

use crate::adapters::vsphere::split_vmdk_path;
use crate::common::build_client;
use crate::credentials::SourceCredentials;
use crate::disk::DiskStream;
use crate::error::InventoryError;
use crate::models::HostBinding;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

async fn check(response: Response, what: &str) -> Result<Response, InventoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            InventoryError::Authentication(format!("{what}: {status}"))
        }
        StatusCode::NOT_FOUND => InventoryError::ItemNotFound(format!("{what}: {body}")),
        _ => InventoryError::SourceUnavailable(format!("{what} failed: {status} - {body}")),
    })
}

// --- oVirt --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ImageTransfer {
    id: String,
    #[serde(default)]
    transfer_url: Option<String>,
    #[serde(default)]
    proxy_url: Option<String>,
}

/// Body of the imageio download request for one disk.
pub fn image_transfer_request(disk_id: &str) -> Value {
    json!({
        "disk": {"id": disk_id},
        "direction": "download",
        "format": "raw",
        "inactivity_timeout": 120
    })
}

fn engine_api(engine_url: &str) -> String {
    let base = engine_url.trim_end_matches('/');
    if base.ends_with("/ovirt-engine/api") {
        base.to_string()
    } else {
        format!("{base}/ovirt-engine/api")
    }
}

/// Open an oVirt disk through an imageio download transfer.
pub async fn open_ovirt_disk(
    engine_url: &str,
    creds: &SourceCredentials,
    disk_id: &str,
) -> Result<DiskStream, InventoryError> {
    let (user, password) = creds.basic()?;
    let client = build_client(&creds.tls(), None)?;
    let api = engine_api(engine_url);

    let response = client
        .post(format!("{api}/imagetransfers"))
        .basic_auth(user, Some(password))
        .header("Accept", "application/json")
        .json(&image_transfer_request(disk_id))
        .send()
        .await
        .map_err(|e| InventoryError::SourceUnavailable(format!("image transfer: {e}")))?;
    let transfer: ImageTransfer = check(response, "create image transfer").await?.json().await?;
    let url = transfer
        .transfer_url
        .or(transfer.proxy_url)
        .ok_or_else(|| InventoryError::SourceSchema(format!("image transfer {} has no url", transfer.id)))?;
    info!("Opened image transfer {} for disk {}", transfer.id, disk_id);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| InventoryError::SourceUnavailable(format!("imageio GET: {e}")))?;
    let response = check(response, "imageio download").await?;

    let finalize_url = format!("{api}/imagetransfers/{}/finalize", transfer.id);
    let (user, password) = (user.to_string(), password.to_string());
    let finisher = Box::pin(async move {
        debug!("Finalizing image transfer at {}", finalize_url);
        let response = client
            .post(&finalize_url)
            .basic_auth(user, Some(password))
            .header("Accept", "application/json")
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| InventoryError::SourceUnavailable(format!("finalize transfer: {e}")))?;
        check(response, "finalize image transfer").await.map(|_| ())
    });
    Ok(DiskStream::from_response(response, None)?.with_finisher(finisher))
}

// --- OpenStack ----------------------------------------------------------

/// Keystone v3 password authentication body.
pub fn keystone_auth_request(creds: &SourceCredentials) -> Result<Value, InventoryError> {
    let (user, password) = creds.basic()?;
    let domain = creds.domain_name.as_deref().unwrap_or("Default");
    let mut body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {"user": {"name": user, "password": password, "domain": {"name": domain}}}
            }
        }
    });
    if let Some(project) = &creds.project_name {
        body["auth"]["scope"] = json!({"project": {"name": project, "domain": {"name": domain}}});
    }
    Ok(body)
}

/// Public image service endpoint from a Keystone token body.
pub fn image_endpoint(token_body: &Value, region: Option<&str>) -> Result<String, InventoryError> {
    let catalog = token_body["token"]["catalog"]
        .as_array()
        .ok_or_else(|| InventoryError::SourceSchema("token has no service catalog".to_string()))?;
    catalog
        .iter()
        .filter(|service| service["type"] == "image")
        .filter_map(|service| service["endpoints"].as_array())
        .flatten()
        .find(|ep| {
            ep["interface"] == "public"
                && region.is_none_or(|r| ep["region"] == r || ep["region_id"] == r)
        })
        .and_then(|ep| ep["url"].as_str())
        .map(|url| url.trim_end_matches('/').to_string())
        .ok_or_else(|| InventoryError::ItemNotFound("public image endpoint".to_string()))
}

/// Open a Glance image's file.
pub async fn open_openstack_image(
    creds: &SourceCredentials,
    image_id: &str,
) -> Result<DiskStream, InventoryError> {
    let identity = creds
        .url
        .as_deref()
        .ok_or_else(|| InventoryError::Authentication("credentials have no identity url".to_string()))?
        .trim_end_matches('/');
    let client = build_client(&creds.tls(), None)?;

    let token = creds.token.clone().unwrap_or_default();
    let response = if token.is_empty() {
        client
            .post(format!("{identity}/auth/tokens"))
            .json(&keystone_auth_request(creds)?)
            .send()
            .await
    } else {
        client
            .get(format!("{identity}/auth/tokens"))
            .header("X-Auth-Token", &token)
            .header("X-Subject-Token", &token)
            .send()
            .await
    }
    .map_err(|e| InventoryError::SourceUnavailable(format!("keystone: {e}")))?;
    let response = check(response, "keystone authentication").await?;
    let subject = response
        .headers()
        .get("X-Subject-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or(token);
    let body: Value = response.json().await?;
    let endpoint = image_endpoint(&body, creds.region_name.as_deref())?;

    let response = client
        .get(format!("{endpoint}/v2/images/{image_id}/file"))
        .header("X-Auth-Token", subject)
        .send()
        .await
        .map_err(|e| InventoryError::SourceUnavailable(format!("glance: {e}")))?;
    DiskStream::from_response(check(response, "glance image download").await?, None)
}

// --- vSphere ------------------------------------------------------------

/// ESXi file service URL for a `[datastore] path` disk file.
pub fn esxi_file_url(ip_address: &str, file: &str) -> Result<String, InventoryError> {
    let (datastore, path) = split_vmdk_path(file)?;
    let path = path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    Ok(format!(
        "https://{}/folder/{}?dcPath=ha-datacenter&dsName={}",
        ip_address,
        path,
        urlencoding::encode(datastore)
    ))
}

/// Open a vmdk through the ESXi host's file service.
///
/// The `-flat` extent holds the data; descriptor files are rewritten to it.
pub async fn open_vsphere_disk(file: &str, host: &HostBinding) -> Result<DiskStream, InventoryError> {
    let flat = match file.strip_suffix(".vmdk") {
        Some(stem) if !stem.ends_with("-flat") => format!("{stem}-flat.vmdk"),
        _ => file.to_string(),
    };
    let url = esxi_file_url(&host.ip_address, &flat)?;
    let tls = crate::common::TlsOptions {
        insecure_skip_verify: host.insecure_skip_verify,
        cacert: host.cacert.clone(),
    };
    let client: Client = build_client(&tls, None)?;
    debug!("GET {}", url);
    let response = client
        .get(&url)
        .basic_auth(&host.user, Some(&host.password))
        .send()
        .await
        .map_err(|e| InventoryError::SourceUnavailable(format!("esxi {}: {e}", host.ip_address)))?;
    DiskStream::from_response(check(response, "esxi file download").await?, None)
}
