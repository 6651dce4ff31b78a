//! Inventory payload parsers, one module per platform
//!
//! Parsers are pure functions over the JSON the inventory service returns
//! for `?detail=4` listings. They never perform I/O.

pub mod ec2;
pub mod openshift;
pub mod openstack;
pub mod ova;
pub mod ovirt;
pub mod vsphere;

use crate::error::InventoryError;
use crds::ProviderType;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Inventory collections read for one platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collections {
    pub vms: &'static str,
    pub networks: &'static str,
    pub storages: &'static str,
}

/// Collection names per platform
pub fn collections(provider_type: ProviderType) -> Collections {
    match provider_type {
        ProviderType::Vsphere => Collections {
            vms: "vms",
            networks: "networks",
            storages: "datastores",
        },
        ProviderType::Ovirt => Collections {
            vms: "vms",
            networks: "networks",
            storages: "storagedomains",
        },
        ProviderType::Openstack => Collections {
            vms: "vms",
            networks: "networks",
            storages: "volumetypes",
        },
        ProviderType::Ova | ProviderType::Ec2 => Collections {
            vms: "vms",
            networks: "networks",
            storages: "storages",
        },
        ProviderType::Openshift => Collections {
            vms: "vms",
            networks: "networkattachmentdefinitions",
            storages: "storageclasses",
        },
    }
}

/// Deserialize a listing, mapping shape errors to `SourceSchema`.
pub(crate) fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, InventoryError> {
    serde_json::from_value(value)
        .map_err(|e| InventoryError::SourceSchema(format!("{what}: {e}")))
}

/// Simple `{id, name}` record shared by several platforms
#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct IdName {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// `{kind, id}` reference used by vSphere payloads
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub(crate) struct Ref {
    #[serde(default)]
    pub id: String,
}
