//! Pair string grammar
//!
//! ```text
//! map        := pair ("," pair)*
//! pair       := source ":" target (";" option)*
//! source     := <name> | <ns> "/" <name>
//! target-net := "default" | "ignored" | <name> | <ns> "/" <name>
//! target-sto := <name> | <ns> "/" <name>        # ns is ignored
//! option     := key "=" value
//! ```
//!
//! Whitespace around separators is stripped and empty segments are skipped, so
//! a trailing `,` or `;` is accepted. Any malformed pair fails the whole map.

use crate::error::MappingError;
use crds::{
    AccessMode, DestinationNetwork, DestinationStorage, NetworkType, OffloadPlugin, StorageVendorProduct,
    VSphereXcopyPluginConfig, VolumeMode,
};
use std::fmt;

/// Source side of a pair: `name` or `ns/name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceName {
    pub namespace: Option<String>,
    pub name: String,
}

impl SourceName {
    pub fn parse(s: &str) -> Result<Self, MappingError> {
        let s = s.trim();
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (Some(ns.trim().to_string()).filter(|ns| !ns.is_empty()), name.trim()),
            None => (None, s),
        };
        if name.is_empty() {
            return Err(MappingError::MalformedPair(s.to_string()));
        }
        Ok(Self {
            namespace,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Target side of a network pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkTarget {
    /// `default`
    Pod,
    /// `ignored`
    Ignored,
    /// `name` (default namespace) or `ns/name`
    Multus { namespace: String, name: String },
}

impl NetworkTarget {
    pub fn parse(s: &str, default_namespace: &str) -> Result<Self, MappingError> {
        let s = s.trim();
        if let Some((ns, name)) = s.split_once('/') {
            let (ns, name) = (ns.trim(), name.trim());
            if name.is_empty() {
                return Err(MappingError::MalformedPair(s.to_string()));
            }
            let namespace = if ns.is_empty() { default_namespace } else { ns };
            return Ok(Self::Multus {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        match s {
            "" => Err(MappingError::MalformedPair(s.to_string())),
            "default" => Ok(Self::Pod),
            "ignored" => Ok(Self::Ignored),
            name => Ok(Self::Multus {
                namespace: default_namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }

    pub fn to_destination(&self) -> DestinationNetwork {
        match self {
            Self::Pod => DestinationNetwork::pod(),
            Self::Ignored => DestinationNetwork::ignored(),
            Self::Multus { namespace, name } => DestinationNetwork::multus(namespace.clone(), name.clone()),
        }
    }

    /// Inverse of [`NetworkTarget::to_destination`]
    pub fn from_destination(destination: &DestinationNetwork, default_namespace: &str) -> Self {
        match destination.type_ {
            NetworkType::Pod => Self::Pod,
            NetworkType::Ignored => Self::Ignored,
            NetworkType::Multus => Self::Multus {
                namespace: destination
                    .namespace
                    .clone()
                    .unwrap_or_else(|| default_namespace.to_string()),
                name: destination.name.clone().unwrap_or_default(),
            },
        }
    }
}

impl fmt::Display for NetworkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod => f.write_str("default"),
            Self::Ignored => f.write_str("ignored"),
            Self::Multus { namespace, name } => write!(f, "{namespace}/{name}"),
        }
    }
}

/// A parsed, unresolved network pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPairSpec {
    pub source: SourceName,
    pub target: NetworkTarget,
}

impl fmt::Display for NetworkPairSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.target)
    }
}

/// Copy offload plugins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadPluginKind {
    Vsphere,
}

impl OffloadPluginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vsphere => "vsphere",
        }
    }
}

impl std::str::FromStr for OffloadPluginKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vsphere" => Ok(Self::Vsphere),
            other => Err(format!("invalid offload plugin '{other}', must be one of: vsphere")),
        }
    }
}

/// Per-pair storage options; also used as map-wide defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    pub volume_mode: Option<VolumeMode>,
    pub access_mode: Option<AccessMode>,
    pub offload_plugin: Option<OffloadPluginKind>,
    pub offload_vendor: Option<StorageVendorProduct>,
    pub offload_secret: Option<String>,
}

impl StorageOptions {
    fn apply(&mut self, option: &str) -> Result<(), MappingError> {
        let (key, value) = option
            .split_once('=')
            .ok_or_else(|| MappingError::InvalidOption(format!("'{option}': expected 'key=value'")))?;
        let (key, value) = (key.trim(), value.trim());
        match key {
            "volumeMode" => self.volume_mode = Some(value.parse().map_err(MappingError::InvalidOption)?),
            "accessMode" => self.access_mode = Some(value.parse().map_err(MappingError::InvalidOption)?),
            "offloadPlugin" => self.offload_plugin = Some(value.parse().map_err(MappingError::InvalidOption)?),
            "offloadVendor" => self.offload_vendor = Some(value.parse().map_err(MappingError::InvalidOption)?),
            "offloadSecret" => self.offload_secret = Some(value.to_string()).filter(|v| !v.is_empty()),
            other => return Err(MappingError::UnknownOption(other.to_string())),
        }
        Ok(())
    }

    /// Plugin and vendor must be given together, and offload needs the
    /// array secret.
    pub fn check_offload(&self, source: &str) -> Result<(), MappingError> {
        if self.offload_plugin.is_some() != self.offload_vendor.is_some() {
            return Err(MappingError::OffloadIncomplete(source.to_string()));
        }
        if self.offload_plugin.is_some() && self.offload_secret.is_none() {
            return Err(MappingError::MissingOffloadSecret(source.to_string()));
        }
        Ok(())
    }

    pub fn offload(&self) -> Option<OffloadPlugin> {
        match (self.offload_plugin, self.offload_vendor, &self.offload_secret) {
            (Some(OffloadPluginKind::Vsphere), Some(vendor), Some(secret)) => Some(OffloadPlugin {
                vsphere_xcopy_config: Some(VSphereXcopyPluginConfig {
                    secret_ref: secret.clone(),
                    storage_vendor_product: vendor,
                }),
            }),
            _ => None,
        }
    }
}

/// A parsed, unresolved storage pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePairSpec {
    pub source: SourceName,
    pub storage_class: String,
    pub options: StorageOptions,
}

impl StoragePairSpec {
    pub fn destination(&self) -> DestinationStorage {
        DestinationStorage {
            storage_class: self.storage_class.clone(),
            volume_mode: self.options.volume_mode,
            access_mode: self.options.access_mode,
        }
    }
}

impl fmt::Display for StoragePairSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.storage_class)?;
        let o = &self.options;
        if let Some(m) = o.volume_mode {
            write!(f, ";volumeMode={}", m.as_str())?;
        }
        if let Some(m) = o.access_mode {
            write!(f, ";accessMode={}", m.as_str())?;
        }
        if let Some(p) = o.offload_plugin {
            write!(f, ";offloadPlugin={}", p.as_str())?;
        }
        if let Some(v) = o.offload_vendor {
            write!(f, ";offloadVendor={}", v.as_str())?;
        }
        if let Some(s) = &o.offload_secret {
            write!(f, ";offloadSecret={s}")?;
        }
        Ok(())
    }
}

fn segments(input: &str, separator: char) -> impl Iterator<Item = &str> {
    input.split(separator).map(str::trim).filter(|s| !s.is_empty())
}

fn split_pair(pair: &str) -> Result<(&str, &str), MappingError> {
    let (source, target) = pair
        .split_once(':')
        .ok_or_else(|| MappingError::MalformedPair(pair.to_string()))?;
    let (source, target) = (source.trim(), target.trim());
    if source.is_empty() || target.is_empty() {
        return Err(MappingError::MalformedPair(pair.to_string()));
    }
    Ok((source, target))
}

/// Parse a network map string. Bare target names land in `default_namespace`.
pub fn parse_network_pairs(input: &str, default_namespace: &str) -> Result<Vec<NetworkPairSpec>, MappingError> {
    segments(input, ',')
        .map(|pair| {
            let (source, target) = split_pair(pair)?;
            Ok(NetworkPairSpec {
                source: SourceName::parse(source)?,
                target: NetworkTarget::parse(target, default_namespace)?,
            })
        })
        .collect()
}

/// Parse a storage map string. Options not set on a pair come from `defaults`.
pub fn parse_storage_pairs(input: &str, defaults: &StorageOptions) -> Result<Vec<StoragePairSpec>, MappingError> {
    segments(input, ',')
        .map(|pair| {
            let mut parts = segments(pair, ';');
            let main = parts.next().ok_or_else(|| MappingError::MalformedPair(pair.to_string()))?;
            let (source, target) = split_pair(main)?;
            // Storage classes are cluster scoped; a namespace prefix is dropped.
            let storage_class = match target.split_once('/') {
                Some((_, class)) => class.trim(),
                None => target,
            };
            if storage_class.is_empty() {
                return Err(MappingError::MalformedPair(pair.to_string()));
            }
            let mut options = defaults.clone();
            for option in parts {
                options.apply(option)?;
            }
            options.check_offload(source)?;
            Ok(StoragePairSpec {
                source: SourceName::parse(source)?,
                storage_class: storage_class.to_string(),
                options,
            })
        })
        .collect()
}

/// Join pairs back into a map string.
pub fn format_pairs<T: fmt::Display>(pairs: &[T]) -> String {
    pairs.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}
