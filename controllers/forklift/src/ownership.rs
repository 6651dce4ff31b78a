//! Owner references between parents and the objects created for them.
//!
//! An object has at most one controller owner and any number of shared
//! (non-controller) owners. Credential secrets referenced by several hosts
//! carry one shared owner per host, so deleting every host releases the
//! secret.

use crate::cluster::ClusterClient;
use crate::error::ControllerError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use tracing::{debug, warn};

/// Attempts for a read-modify-write against a shared object
pub const MAX_CONFLICT_RETRIES: usize = 5;

/// Owner reference to `owner`; `None` when it has not been persisted yet.
pub fn owner_reference<K>(owner: &K, controller: bool) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let reference = owner.owner_ref(&())?;
    Some(OwnerReference {
        controller: controller.then_some(true),
        block_owner_deletion: controller.then_some(true),
        ..reference
    })
}

/// Append `owner` to `refs`. A reference with the same UID makes this a
/// no-op. A second controller reference is demoted to a shared one.
///
/// Returns true when `refs` changed.
pub fn append_owner(refs: &mut Vec<OwnerReference>, mut owner: OwnerReference) -> bool {
    if refs.iter().any(|r| r.uid == owner.uid) {
        return false;
    }
    if owner.controller == Some(true) && refs.iter().any(|r| r.controller == Some(true)) {
        warn!("{} {} cannot be a second controller owner, adding as shared owner", owner.kind, owner.name);
        owner.controller = None;
        owner.block_owner_deletion = None;
    }
    refs.push(owner);
    true
}

/// Controller owner of `meta`, if any.
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.controller == Some(true))
}

/// True when `uid` is among the owners of `meta`.
pub fn is_owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.uid == uid)
}

/// Make `owner` a shared owner of a secret, retrying on write conflicts.
///
/// Returns true when the secret was updated.
pub async fn ensure_secret_owner(
    cluster: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    owner: &OwnerReference,
) -> Result<bool, ControllerError> {
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let mut secret = cluster
            .get_secret(namespace, name)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("secret {namespace}/{name}")))?;
        let refs = secret.metadata.owner_references.get_or_insert_with(Vec::new);
        if !append_owner(refs, owner.clone()) {
            return Ok(false);
        }
        match cluster.replace_secret(&secret).await {
            Ok(_) => {
                debug!("Added {} {} as owner of secret {}/{}", owner.kind, owner.name, namespace, name);
                return Ok(true);
            }
            Err(e) if e.is_conflict() => {
                debug!("Conflict updating secret {}/{} (attempt {})", namespace, name, attempt);
            }
            Err(e) => return Err(e),
        }
    }
    Err(ControllerError::Conflict(format!(
        "secret {namespace}/{name} kept changing after {MAX_CONFLICT_RETRIES} attempts"
    )))
}
