//! Resolve parsed pairs against the source inventory
//!
//! Source names become inventory references. One name may match several
//! records (vSphere allows duplicate network names across folders); each
//! match yields its own pair. The resolved sequence is validated before it
//! is returned.

use crate::error::MappingError;
use crate::parse::{NetworkPairSpec, SourceName, StoragePairSpec};
use crate::validate::{validate_network_pairs, validate_storage_pairs};
use crds::{NetworkPair, ProviderType, SourceRef, StoragePair};
use inventory_client::adapters::openstack::DEFAULT_VOLUME_TYPE;
use inventory_client::{Network, SourceAdapter, Storage};
use tracing::debug;

/// Networks matching a source name: by name (and namespace when given), else by id.
pub fn match_networks(source: &SourceName, networks: &[Network]) -> Result<Vec<SourceRef>, MappingError> {
    let by_name: Vec<&Network> = networks
        .iter()
        .filter(|n| {
            n.name == source.name
                && source
                    .namespace
                    .as_deref()
                    .is_none_or(|ns| n.namespace.as_deref() == Some(ns))
        })
        .collect();
    let matched = if by_name.is_empty() {
        networks.iter().filter(|n| n.id == source.name).collect()
    } else {
        by_name
    };
    if matched.is_empty() {
        return Err(MappingError::SourceNotFound(source.to_string()));
    }
    Ok(matched
        .into_iter()
        .map(|n| SourceRef {
            id: Some(n.id.clone()).filter(|id| !id.is_empty()),
            name: Some(n.name.clone()),
            namespace: n.namespace.clone(),
            type_: None,
        })
        .collect())
}

/// Storage references for a source name, following each platform's rules.
pub fn match_storages(
    provider_type: ProviderType,
    source: &SourceName,
    storages: &[Storage],
) -> Result<Vec<SourceRef>, MappingError> {
    let name = source.name.as_str();
    match provider_type {
        // Storage classes on the source cluster are referenced by name only.
        ProviderType::Openshift => Ok(vec![SourceRef::by_name(name)]),
        ProviderType::Openstack if name == DEFAULT_VOLUME_TYPE => Ok(vec![SourceRef {
            type_: Some("default".to_string()),
            ..Default::default()
        }]),
        ProviderType::Ec2 => {
            let wanted = name.to_ascii_lowercase();
            let found = storages.iter().any(|s| {
                s.type_.as_deref().unwrap_or(s.name.as_str()).eq_ignore_ascii_case(&wanted)
            });
            if !found {
                return Err(MappingError::SourceNotFound(source.to_string()));
            }
            Ok(vec![SourceRef::by_name(wanted)])
        }
        _ => {
            let matched: Vec<SourceRef> = storages
                .iter()
                .filter(|s| s.name == name)
                .chain(storages.iter().filter(|s| s.id == name && s.name != name))
                .map(|s| SourceRef {
                    id: Some(s.id.clone()),
                    name: Some(s.name.clone()),
                    ..Default::default()
                })
                .collect();
            if matched.is_empty() {
                return Err(MappingError::SourceNotFound(source.to_string()));
            }
            Ok(matched)
        }
    }
}

/// Resolve and validate network pairs.
pub async fn resolve_network_pairs(
    specs: &[NetworkPairSpec],
    adapter: &dyn SourceAdapter,
) -> Result<Vec<NetworkPair>, MappingError> {
    let networks = adapter.list_networks().await?;
    let mut pairs = Vec::with_capacity(specs.len());
    for spec in specs {
        let destination = spec.target.to_destination();
        let sources = match_networks(&spec.source, &networks)?;
        debug!("Network {} resolved to {} source(s)", spec.source, sources.len());
        pairs.extend(sources.into_iter().map(|source| NetworkPair {
            source,
            destination: destination.clone(),
        }));
    }
    validate_network_pairs(&pairs)?;
    Ok(pairs)
}

/// Resolve and validate storage pairs.
pub async fn resolve_storage_pairs(
    specs: &[StoragePairSpec],
    adapter: &dyn SourceAdapter,
) -> Result<Vec<StoragePair>, MappingError> {
    let provider_type = adapter.provider_type();
    let storages = match provider_type {
        ProviderType::Openshift => Vec::new(),
        _ => adapter.list_storages().await?,
    };
    let mut pairs: Vec<StoragePair> = Vec::with_capacity(specs.len());
    for spec in specs {
        let sources = match_storages(provider_type, &spec.source, &storages)?;
        debug!("Storage {} resolved to {} source(s)", spec.source, sources.len());
        for source in sources {
            // EC2 types are case-insensitive; `gp3` and `GP3` name one source.
            if provider_type == ProviderType::Ec2 && pairs.iter().any(|p| p.source == source) {
                continue;
            }
            pairs.push(StoragePair {
                source,
                destination: spec.destination(),
                offload_plugin: spec.options.offload(),
            });
        }
    }
    validate_storage_pairs(&pairs)?;
    Ok(pairs)
}
