//! Source platform inventory client
//!
//! Read-only views of source providers (vSphere, oVirt, OpenStack, OVA, EC2,
//! OpenShift) served by the inventory service, normalised into one model, plus
//! disk byte transport and the storage offload driver contract.
//!
//! # Example
//!
//! ```no_run
//! use inventory_client::{InventoryClient, SourceAdapter, SourceCredentials, TlsOptions};
//! use crds::ProviderType;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = InventoryClient::new(
//!     "https://forklift-inventory:8443".to_string(),
//!     Some("service-account-token".to_string()),
//!     &TlsOptions::default(),
//! )?;
//!
//! let adapter = client.adapter(
//!     ProviderType::Vsphere,
//!     "provider-uid",
//!     "https://vcenter.example.com/sdk",
//!     SourceCredentials::default(),
//! );
//! for vm in adapter.list_vms().await? {
//!     println!("{} has {} disks", vm.name, vm.disks.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod client;
pub mod common;
pub mod credentials;
pub mod disk;
pub mod error;
pub mod models;
pub mod offload;
#[path = "trait.rs"]
pub mod source_trait;
pub mod transfer;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{InventoryClient, ProviderAdapter};
pub use common::{HttpClient, TlsOptions};
pub use credentials::SourceCredentials;
pub use disk::DiskStream;
pub use error::{InventoryError, OffloadError};
pub use models::*;
pub use offload::{OffloadCredentials, OffloadDriver, OffloadRegistry, OffloadSession, TargetVolume};
pub use source_trait::{SourceAdapter, find_vm_in};
#[cfg(feature = "test-util")]
pub use mock::{MockOffloadDriver, MockSourceAdapter};
