//! Host reconciler
//!
//! A Host binds an ESXi host of a vSphere provider to a data transport
//! address and credentials. Without an explicit secret the provider's
//! credentials are copied into a host secret owned by the Host. A
//! user-supplied secret gains the Host as a shared owner instead, so one
//! secret may serve several hosts.

use super::provider::CREATED_FOR_LABEL;
use super::{Reconciler, identity, set_ready};
use crate::cluster::{EventRecord, ResourceKind};
use crate::error::ControllerError;
use crate::inventory::provider_secret_data;
use crate::ownership::{append_owner, controller_of, ensure_secret_owner, owner_reference};
use crds::condition::reason;
use crds::{Host, Provider, ProviderType, ResourceRef};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Label on secrets created for a host, valued with the host UID
pub const HOST_LABEL: &str = "forklift.konveyor.io/host";

/// Keys copied from the provider secret into a host secret
const HOST_SECRET_KEYS: [&str; 4] = ["user", "password", "insecureSkipVerify", "cacert"];

pub fn validate_host(host: &Host) -> Result<(), ControllerError> {
    if host.spec.id.trim().is_empty() {
        return Err(ControllerError::Validation("host id is required".to_string()));
    }
    host.spec
        .ip_address
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| ControllerError::Validation(format!("'{}' is not an IP address", host.spec.ip_address)))?;
    Ok(())
}

/// Host secret data: provider credentials pointed at the host's SDK endpoint.
pub fn host_secret_data(provider_data: &BTreeMap<String, Vec<u8>>, ip_address: &str) -> BTreeMap<String, ByteString> {
    let mut data: BTreeMap<String, ByteString> = HOST_SECRET_KEYS
        .iter()
        .filter_map(|k| provider_data.get(*k).map(|v| (k.to_string(), ByteString(v.clone()))))
        .collect();
    data.insert(
        "url".to_string(),
        ByteString(format!("https://{}/sdk", ip_address.trim()).into_bytes()),
    );
    data
}

impl Reconciler {
    pub async fn reconcile_host(&self, host: &Host) -> Result<Action, ControllerError> {
        let (namespace, name) = identity(host);
        info!("Reconciling Host {}/{}", namespace, name);
        let mut status = host.status.clone().unwrap_or_default();
        status.observed_generation = host.metadata.generation;

        let provider_ns = host.spec.provider.namespace_or(&namespace).to_string();
        let Some(provider) = self.cluster.get_provider(&provider_ns, &host.spec.provider.name).await? else {
            let message = format!("provider {}/{} not found", provider_ns, host.spec.provider.name);
            warn!("Host {}/{}: {}", namespace, name, message);
            set_ready(&mut status.conditions, Err((reason::PROVIDER_NOT_READY, message)), None);
            self.write_status(ResourceKind::Host, &namespace, &name, &status).await?;
            return Ok(Action::requeue(self.config.requeue));
        };

        if let Err(e) = self.check_host(host, &provider) {
            warn!("Host {}/{} is invalid: {}", namespace, name, e);
            set_ready(&mut status.conditions, Err((e.reason(), e.to_string())), None);
            self.write_status(ResourceKind::Host, &namespace, &name, &status).await?;
            return Ok(Action::await_change());
        }

        self.ensure_host_owned_by_provider(host, &provider).await?;

        match &host.spec.secret {
            Some(secret_ref) => {
                let owner = owner_reference(host, false)
                    .ok_or_else(|| ControllerError::Configuration(format!("host {namespace}/{name} has no uid")))?;
                let secret_ns = secret_ref.namespace_or(&namespace);
                if ensure_secret_owner(self.cluster.as_ref(), secret_ns, &secret_ref.name, &owner).await? {
                    info!("Host {}/{} now shares secret {}/{}", namespace, name, secret_ns, secret_ref.name);
                }
            }
            None => {
                if provider.spec.secret.is_none() {
                    let e = ControllerError::Configuration(format!(
                        "provider {} has no secret to derive host credentials from",
                        provider.metadata.name.as_deref().unwrap_or_default()
                    ));
                    set_ready(&mut status.conditions, Err((e.reason(), e.to_string())), None);
                    self.write_status(ResourceKind::Host, &namespace, &name, &status).await?;
                    return Ok(Action::await_change());
                }
                let secret = self.ensure_host_secret(host, &provider).await?;
                let patch = serde_json::json!({ "spec": { "secret": secret } });
                self.cluster
                    .patch_resource(ResourceKind::Host, &namespace, &name, &patch)
                    .await?;
            }
        }

        set_ready(&mut status.conditions, Ok(()), None);
        self.write_status(ResourceKind::Host, &namespace, &name, &status).await?;
        Ok(Action::await_change())
    }

    fn check_host(&self, host: &Host, provider: &Provider) -> Result<(), ControllerError> {
        if provider.spec.type_ != ProviderType::Vsphere {
            return Err(ControllerError::Validation(format!(
                "hosts are only supported for vsphere providers, not {}",
                provider.spec.type_
            )));
        }
        validate_host(host)
    }

    /// Make the provider the controller owner of the host.
    async fn ensure_host_owned_by_provider(&self, host: &Host, provider: &Provider) -> Result<(), ControllerError> {
        if controller_of(&host.metadata).is_some() {
            return Ok(());
        }
        let (namespace, name) = identity(host);
        let Some(owner) = owner_reference(provider, true) else {
            return Ok(());
        };
        let mut refs = host.metadata.owner_references.clone().unwrap_or_default();
        if append_owner(&mut refs, owner) {
            let patch = serde_json::json!({ "metadata": { "ownerReferences": refs } });
            self.cluster
                .patch_resource(ResourceKind::Host, &namespace, &name, &patch)
                .await?;
            debug!("Host {}/{} now owned by its provider", namespace, name);
        }
        Ok(())
    }

    /// Secret with the provider's credentials for this host; found by label before creating.
    async fn ensure_host_secret(&self, host: &Host, provider: &Provider) -> Result<ResourceRef, ControllerError> {
        let (namespace, name) = identity(host);
        let uid = host
            .metadata
            .uid
            .clone()
            .ok_or_else(|| ControllerError::Configuration(format!("host {namespace}/{name} has no uid")))?;
        let selector = format!("{HOST_LABEL}={uid}");
        if let Some(existing) = self.cluster.list_secrets(&namespace, &selector).await?.into_iter().next() {
            return Ok(ResourceRef::with_namespace(existing.metadata.name.unwrap_or_default(), namespace));
        }

        let provider_data = provider_secret_data(self.cluster.as_ref(), provider).await?;
        let owner = owner_reference(host, true)
            .ok_or_else(|| ControllerError::Configuration(format!("host {namespace}/{name} has no uid")))?;
        let secret = Secret {
            metadata: ObjectMeta {
                generate_name: Some(format!("{name}-")),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([
                    (HOST_LABEL.to_string(), uid),
                    (CREATED_FOR_LABEL.to_string(), "hosts".to_string()),
                ])),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            data: Some(host_secret_data(&provider_data, &host.spec.ip_address)),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        let created = self.cluster.create_secret(&secret).await?;
        let secret_name = created.metadata.name.unwrap_or_default();
        self.event(host, EventRecord::normal("SecretCreated", format!("Created host secret {secret_name}")))
            .await;
        Ok(ResourceRef::with_namespace(secret_name, namespace))
    }
}
