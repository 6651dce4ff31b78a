//! Network and storage map pairs
//!
//! Parses `source:target[;key=value...]` pair strings, resolves the source
//! side against a provider's inventory, checks map invariants, generates
//! default maps for plans without explicit pairs and edits existing map
//! objects.
//!
//! # Example
//!
//! ```no_run
//! use inventory_client::SourceAdapter;
//! use mapping::{parse_network_pairs, resolve_network_pairs};
//!
//! # async fn example(adapter: &dyn SourceAdapter) -> Result<(), mapping::MappingError> {
//! let specs = parse_network_pairs("VM Network:default,Mgmt:mtv/br-mgmt", "mtv")?;
//! let pairs = resolve_network_pairs(&specs, adapter).await?;
//! println!("{} network pairs", pairs.len());
//! # Ok(())
//! # }
//! ```

pub mod defaults;
pub mod error;
pub mod parse;
pub mod patch;
pub mod resolve;
pub mod validate;

pub use defaults::{
    TargetNetwork, TargetStorageClass, default_network_pairs, default_storage_pairs, select_default_storage_class,
    source_networks_for, source_storages_for,
};
pub use error::MappingError;
pub use parse::{
    NetworkPairSpec, NetworkTarget, SourceName, StorageOptions, StoragePairSpec, format_pairs, parse_network_pairs,
    parse_storage_pairs,
};
pub use patch::{MapPatch, PatchReport, apply_patch};
pub use resolve::{resolve_network_pairs, resolve_storage_pairs};
pub use validate::{validate_network_pairs, validate_storage_pairs};
