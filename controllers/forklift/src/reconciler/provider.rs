//! Provider reconciler
//!
//! An OpenShift provider may be declared with a bare token in its settings
//! instead of a secret. The token is moved into a controller-owned secret the
//! first time the provider is seen; once `spec.secret` is set no secret is
//! ever created for it again.

use super::{Reconciler, identity, set_ready};
use crate::cluster::{EventRecord, ResourceKind};
use crate::error::ControllerError;
use crate::ownership::owner_reference;
use crds::condition::{self, Condition, condition_type};
use crds::{Provider, ProviderType, ResourceRef};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Settings key carrying a bearer token for OpenShift providers
pub const TOKEN_SETTING: &str = "token";

/// Label on secrets created for a provider, valued with the provider UID
pub const PROVIDER_LABEL: &str = "forklift.konveyor.io/provider";

/// Label on secrets created by the controller, valued with the owner kind
pub const CREATED_FOR_LABEL: &str = "createdForResourceType";

/// Local OpenShift cluster: no endpoint and no credentials needed.
fn is_local_cluster(provider: &Provider) -> bool {
    provider.spec.type_ == ProviderType::Openshift && provider.spec.url.trim().is_empty()
}

/// Check the provider fields before touching the platform.
pub fn validate_provider(provider: &Provider) -> Result<(), ControllerError> {
    if is_local_cluster(provider) {
        return Ok(());
    }
    if provider.spec.url.trim().is_empty() {
        return Err(ControllerError::Validation("provider url is required".to_string()));
    }
    if provider.spec.secret.is_none() {
        return Err(ControllerError::Configuration("provider secret is required".to_string()));
    }
    Ok(())
}

impl Reconciler {
    pub async fn reconcile_provider(&self, provider: &Provider) -> Result<Action, ControllerError> {
        let (namespace, name) = identity(provider);
        info!("Reconciling Provider {}/{}", namespace, name);

        if provider.spec.secret.is_none() && provider.spec.type_ == ProviderType::Openshift {
            if let Some(token) = provider.spec.settings.get(TOKEN_SETTING) {
                let secret = self.ensure_token_secret(provider, token).await?;
                let patch = serde_json::json!({
                    "spec": {
                        "secret": secret,
                        "settings": { TOKEN_SETTING: null },
                    }
                });
                self.cluster
                    .patch_resource(ResourceKind::Provider, &namespace, &name, &patch)
                    .await?;
                info!("Provider {}/{} now uses secret {}", namespace, name, secret.name);
                return Ok(Action::await_change());
            }
        }

        let mut status = provider.status.clone().unwrap_or_default();
        status.observed_generation = provider.metadata.generation;

        if let Err(e) = validate_provider(provider) {
            warn!("Provider {}/{} is invalid: {}", namespace, name, e);
            set_ready(&mut status.conditions, Err((e.reason(), e.to_string())), None);
            self.write_status(ResourceKind::Provider, &namespace, &name, &status).await?;
            return Ok(Action::await_change());
        }

        // Connection test against the inventory.
        let tested = match self.adapter_for(provider).await {
            Ok(adapter) => adapter.list_vms().await.map(|vms| vms.len()).map_err(ControllerError::from),
            Err(e) => Err(e),
        };
        match tested {
            Ok(count) => {
                info!("Provider {}/{} reachable, {} VM(s) in inventory", namespace, name, count);
                condition::set(
                    &mut status.conditions,
                    Condition::truthy(condition_type::CONNECTION_TEST_SUCCEEDED, condition::reason::READY, ""),
                );
                set_ready(&mut status.conditions, Ok(()), None);
                self.write_status(ResourceKind::Provider, &namespace, &name, &status).await?;
                Ok(Action::await_change())
            }
            Err(e) => {
                warn!("Provider {}/{} connection test failed: {}", namespace, name, e);
                condition::set(
                    &mut status.conditions,
                    Condition::falsy(condition_type::CONNECTION_TEST_SUCCEEDED, e.reason(), e.to_string()),
                );
                set_ready(&mut status.conditions, Err((e.reason(), e.to_string())), None);
                self.write_status(ResourceKind::Provider, &namespace, &name, &status).await?;
                if e.is_retriable() {
                    Err(e)
                } else {
                    Ok(Action::await_change())
                }
            }
        }
    }

    /// Secret holding `token` for `provider`; found by label before creating.
    async fn ensure_token_secret(&self, provider: &Provider, token: &str) -> Result<ResourceRef, ControllerError> {
        let (namespace, name) = identity(provider);
        let uid = provider
            .metadata
            .uid
            .clone()
            .ok_or_else(|| ControllerError::Configuration(format!("provider {namespace}/{name} has no uid")))?;

        let selector = format!("{PROVIDER_LABEL}={uid}");
        if let Some(existing) = self.cluster.list_secrets(&namespace, &selector).await?.into_iter().next() {
            let secret_name = existing.metadata.name.unwrap_or_default();
            info!("Reusing token secret {}/{} for provider {}", namespace, secret_name, name);
            return Ok(ResourceRef::with_namespace(secret_name, namespace));
        }

        let owner = owner_reference(provider, true)
            .ok_or_else(|| ControllerError::Configuration(format!("provider {namespace}/{name} has no uid")))?;
        let mut data = BTreeMap::new();
        data.insert("token".to_string(), ByteString(token.as_bytes().to_vec()));
        let secret = Secret {
            metadata: ObjectMeta {
                generate_name: Some(format!("{name}-")),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([
                    (PROVIDER_LABEL.to_string(), uid),
                    (CREATED_FOR_LABEL.to_string(), "providers".to_string()),
                ])),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        let created = self.cluster.create_secret(&secret).await?;
        let secret_name = created.metadata.name.unwrap_or_default();
        self.event(provider, EventRecord::normal("SecretCreated", format!("Created token secret {secret_name}")))
            .await;
        Ok(ResourceRef::with_namespace(secret_name, namespace))
    }
}
