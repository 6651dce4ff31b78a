//! Mapping errors

use inventory_client::InventoryError;
use thiserror::Error;

/// Errors raised while parsing, validating or resolving map pairs
#[derive(Debug, Error)]
pub enum MappingError {
    /// A pair did not follow `source:target[;key=value...]`
    #[error("Invalid pair '{0}': expected 'source:target'")]
    MalformedPair(String),

    /// A source identity appears in more than one pair
    #[error("Duplicate source '{0}': each source can only be mapped once")]
    DuplicateSource(String),

    /// More than one pair targets pod networking
    #[error(
        "Pod network ('default') can only be mapped once, found it for sources: {}. Use 'source:ignored' for sources that need no network",
        .0.join(", ")
    )]
    PodNetworkReused(Vec<String>),

    /// Only one of offloadPlugin / offloadVendor was given
    #[error("Both offloadPlugin and offloadVendor must be specified together for storage pair '{0}'")]
    OffloadIncomplete(String),

    /// An offload plugin was configured without the storage-array secret
    #[error("Storage pair '{0}' enables copy offload but names no offloadSecret")]
    MissingOffloadSecret(String),

    /// An option value failed validation
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// An option key is not recognised
    #[error("Unknown option '{0}' in storage pair")]
    UnknownOption(String),

    /// A source name did not resolve against the inventory
    #[error("Source '{0}' not found in provider inventory")]
    SourceNotFound(String),

    /// A map object did not have the expected shape
    #[error("Invalid map object: {0}")]
    InvalidMap(String),

    /// Inventory lookup failed
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MappingError {
    /// Condition reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedPair(_) => "MalformedPair",
            Self::DuplicateSource(_) => "DuplicateSource",
            Self::PodNetworkReused(_) => "PodNetworkReused",
            Self::OffloadIncomplete(_) => "OffloadIncomplete",
            Self::MissingOffloadSecret(_) => "MissingOffloadSecret",
            Self::InvalidOption(_) | Self::UnknownOption(_) => "InvalidOption",
            Self::SourceNotFound(_) => "SourceNotFound",
            Self::InvalidMap(_) | Self::Serialization(_) => "InvalidMap",
            Self::Inventory(e) => e.reason(),
        }
    }

    /// Validation errors stay until the user edits the map
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Inventory(_))
    }
}
