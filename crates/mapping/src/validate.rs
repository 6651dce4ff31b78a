//! Map invariants checked after resolution

use crate::error::MappingError;
use crds::{NetworkPair, NetworkType, SourceRef, StoragePair};
use std::collections::HashSet;

/// Uniqueness key for a pair source.
///
/// Sources without id or name (e.g. the OpenStack default volume type) are
/// keyed by their `type`.
fn source_key(source: &SourceRef) -> String {
    let identity = source.identity();
    if identity.is_empty() {
        format!("type:{}", source.type_.as_deref().unwrap_or_default())
    } else {
        identity
    }
}

fn display_name(source: &SourceRef) -> String {
    source
        .name
        .clone()
        .or_else(|| source.id.clone())
        .or_else(|| source.type_.clone())
        .unwrap_or_default()
}

fn check_unique<'a>(sources: impl Iterator<Item = &'a SourceRef>) -> Result<(), MappingError> {
    let mut seen = HashSet::new();
    for source in sources {
        if !seen.insert(source_key(source)) {
            return Err(MappingError::DuplicateSource(display_name(source)));
        }
    }
    Ok(())
}

/// Pod networking at most once; each source at most once.
pub fn validate_network_pairs(pairs: &[NetworkPair]) -> Result<(), MappingError> {
    let pod_sources: Vec<String> = pairs
        .iter()
        .filter(|p| p.destination.type_ == NetworkType::Pod)
        .map(|p| display_name(&p.source))
        .collect();
    if pod_sources.len() > 1 {
        return Err(MappingError::PodNetworkReused(pod_sources));
    }
    check_unique(pairs.iter().map(|p| &p.source))
}

/// Each source at most once; offload configs complete.
pub fn validate_storage_pairs(pairs: &[StoragePair]) -> Result<(), MappingError> {
    check_unique(pairs.iter().map(|p| &p.source))?;
    for pair in pairs {
        if pair.destination.storage_class.is_empty() {
            return Err(MappingError::InvalidMap(format!(
                "storage pair '{}' has no storage class",
                display_name(&pair.source)
            )));
        }
        if let Some(plugin) = &pair.offload_plugin {
            match &plugin.vsphere_xcopy_config {
                None => return Err(MappingError::OffloadIncomplete(display_name(&pair.source))),
                Some(config) if config.secret_ref.trim().is_empty() => {
                    return Err(MappingError::MissingOffloadSecret(display_name(&pair.source)));
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{DestinationNetwork, DestinationStorage, OffloadPlugin, StorageVendorProduct, VSphereXcopyPluginConfig};

    fn net(source: SourceRef, destination: DestinationNetwork) -> NetworkPair {
        NetworkPair { source, destination }
    }

    fn sto(source: SourceRef, class: &str) -> StoragePair {
        StoragePair {
            source,
            destination: DestinationStorage {
                storage_class: class.to_string(),
                ..Default::default()
            },
            offload_plugin: None,
        }
    }

    #[test]
    fn test_pod_network_at_most_once() {
        let pairs = vec![
            net(SourceRef::by_name("net-a"), DestinationNetwork::pod()),
            net(SourceRef::by_name("net-b"), DestinationNetwork::multus("ns", "br")),
            net(SourceRef::by_name("net-c"), DestinationNetwork::pod()),
        ];
        match validate_network_pairs(&pairs).unwrap_err() {
            MappingError::PodNetworkReused(sources) => assert_eq!(sources, vec!["net-a", "net-c"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_multus_target_may_repeat() {
        let pairs = vec![
            net(SourceRef::by_name("net-a"), DestinationNetwork::multus("ns", "br")),
            net(SourceRef::by_name("net-b"), DestinationNetwork::multus("ns", "br")),
            net(SourceRef::by_name("net-c"), DestinationNetwork::ignored()),
            net(SourceRef::by_name("net-d"), DestinationNetwork::ignored()),
        ];
        assert!(validate_network_pairs(&pairs).is_ok());
    }

    #[test]
    fn test_duplicate_source() {
        let pairs = vec![
            net(SourceRef::by_name("VM Network"), DestinationNetwork::pod()),
            net(SourceRef::by_name("VM Network"), DestinationNetwork::ignored()),
        ];
        let err = validate_network_pairs(&pairs).unwrap_err();
        assert!(matches!(err, MappingError::DuplicateSource(ref s) if s == "VM Network"));

        let pairs = vec![sto(SourceRef::by_id("ds-1"), "a"), sto(SourceRef::by_id("ds-1"), "b")];
        assert_eq!(validate_storage_pairs(&pairs).unwrap_err().reason(), "DuplicateSource");
    }

    #[test]
    fn test_same_name_in_different_namespaces_is_distinct() {
        let a = SourceRef {
            name: Some("nad".to_string()),
            namespace: Some("a".to_string()),
            ..Default::default()
        };
        let b = SourceRef {
            namespace: Some("b".to_string()),
            ..a.clone()
        };
        let pairs = vec![
            net(a, DestinationNetwork::multus("t", "x")),
            net(b, DestinationNetwork::multus("t", "y")),
        ];
        assert!(validate_network_pairs(&pairs).is_ok());
    }

    #[test]
    fn test_typed_sources_keyed_by_type() {
        let default = SourceRef {
            type_: Some("default".to_string()),
            ..Default::default()
        };
        let pairs = vec![sto(default.clone(), "a"), sto(default, "b")];
        assert!(validate_storage_pairs(&pairs).is_err());
    }

    #[test]
    fn test_offload_config_required_with_plugin() {
        let mut pair = sto(SourceRef::by_name("ds1"), "ceph");
        pair.offload_plugin = Some(OffloadPlugin {
            vsphere_xcopy_config: None,
        });
        assert_eq!(validate_storage_pairs(&[pair]).unwrap_err().reason(), "OffloadIncomplete");
        assert!(validate_storage_pairs(&[sto(SourceRef::by_name("ds1"), "")]).is_err());
    }

    #[test]
    fn test_offload_secret_required() {
        let mut pair = sto(SourceRef::by_name("ds1"), "ceph");
        pair.offload_plugin = Some(OffloadPlugin {
            vsphere_xcopy_config: Some(VSphereXcopyPluginConfig {
                secret_ref: String::new(),
                storage_vendor_product: StorageVendorProduct::Ontap,
            }),
        });
        let err = validate_storage_pairs(&[pair.clone()]).unwrap_err();
        assert!(matches!(err, MappingError::MissingOffloadSecret(ref s) if s == "ds1"));

        if let Some(config) = pair.offload_plugin.as_mut().and_then(|p| p.vsphere_xcopy_config.as_mut()) {
            config.secret_ref = "array-creds".to_string();
        }
        assert!(validate_storage_pairs(&[pair]).is_ok());
    }
}
