//! Controller-specific error types.
//!
//! Each variant maps to a condition reason and to a retry policy: validation
//! and configuration errors wait for a spec edit, everything else is retried
//! with back-off.

use crds::condition::reason;
use inventory_client::InventoryError;
use kube::Error as KubeError;
use mapping::MappingError;
use thiserror::Error;

/// Errors that can occur in the migration controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Source inventory error
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Map pair parsing, validation or resolution error
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// User-authored spec is invalid
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Required field absent after defaulting
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Referenced object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic update lost against a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation not available for this platform
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Source endpoint request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Condition reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Inventory(e) => e.reason(),
            Self::Mapping(e) => e.reason(),
            Self::Validation(_) => reason::VALIDATION_FAILED,
            Self::Configuration(_) | Self::InvalidConfig(_) => reason::CONFIGURATION_ERROR,
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::Unsupported(_) => "Unsupported",
            Self::Kube(_) | Self::Http(_) | Self::Serialization(_) | Self::Watch(_) => reason::FAILED,
        }
    }

    /// Whether the error clears without a spec change
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Inventory(e) => e.is_retriable(),
            Self::Mapping(MappingError::Inventory(e)) => e.is_retriable(),
            Self::Mapping(_) | Self::Validation(_) | Self::Configuration(_) | Self::InvalidConfig(_) => false,
            _ => true,
        }
    }

    /// True for HTTP 409 from the API server
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Kube(KubeError::Api(response)) => response.code == 409,
            _ => false,
        }
    }
}
