//! Kubernetes object references shared by the migration CRDs
//!
//! Plans, maps and hosts point at each other by namespace and name. The
//! namespace is optional and defaults to the namespace of the referencing
//! resource.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of every CRD in this crate.
pub const API_GROUP: &str = "forklift.konveyor.io";

/// API version of every CRD in this crate.
pub const API_VERSION: &str = "v1beta1";

/// Reference to a namespaced resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Name of the referenced resource
    pub name: String,

    /// Namespace of the referenced resource (defaults to same namespace as the referencing resource)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Create a reference in the same namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a reference with an explicit namespace
    pub fn with_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Namespace to use, falling back to the referencing resource's namespace
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }

    /// `namespace/name` key used for logs and backoff tracking
    pub fn key(&self, default_namespace: &str) -> String {
        format!("{}/{}", self.namespace_or(default_namespace), self.name)
    }
}

/// Source and destination provider pair
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPair {
    /// Provider VMs are migrated from
    pub source: ResourceRef,

    /// Provider VMs are migrated to
    pub destination: ResourceRef,
}

/// Identity of a source-side inventory object (VM, network, storage)
///
/// At least one of `id` or `name` identifies the object. `type` distinguishes
/// pod/multus/ignored networks and default/named storages.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl SourceRef {
    /// Reference by inventory id
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Reference by name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Identity used for uniqueness checks: the id when present, else `namespace/name`.
    pub fn identity(&self) -> String {
        match (&self.id, &self.name) {
            (Some(id), _) if !id.is_empty() => id.clone(),
            (_, Some(name)) => match &self.namespace {
                Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
                _ => name.clone(),
            },
            _ => String::new(),
        }
    }

    /// True when either reference names the same object by id or by name.
    pub fn matches(&self, other: &SourceRef) -> bool {
        let id_match = matches!((&self.id, &other.id), (Some(a), Some(b)) if !a.is_empty() && a == b);
        let name_match = matches!((&self.name, &other.name), (Some(a), Some(b)) if !a.is_empty() && a == b);
        id_match || name_match
    }
}
