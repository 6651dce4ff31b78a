//! Inventory client errors

use thiserror::Error;

/// Errors that can occur when reading a source platform
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The inventory service or source endpoint could not be reached
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The payload did not have the expected shape
    #[error("Unexpected inventory payload: {0}")]
    SourceSchema(String),

    /// A requested id did not resolve
    #[error("Not found: {0}")]
    ItemNotFound(String),

    /// Operation not supported for this platform
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Credentials were rejected or incomplete
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local disk access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InventoryError {
    /// Condition reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) | Self::Http(_) | Self::Io(_) => "SourceUnavailable",
            Self::SourceSchema(_) | Self::Serialization(_) => "SourceSchema",
            Self::ItemNotFound(_) => "ItemNotFound",
            Self::Unsupported(_) => "Unsupported",
            Self::Authentication(_) => "AuthenticationFailed",
        }
    }

    /// Whether a later retry may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_) | Self::Http(_) | Self::Io(_)
        )
    }
}

/// Errors raised by storage offload drivers
#[derive(Debug, Error)]
pub enum OffloadError {
    /// No driver registered for the vendor
    #[error("No offload driver for vendor {0}")]
    UnsupportedVendor(String),

    /// Offload secret is missing required keys
    #[error("Invalid offload credentials: {0}")]
    Credentials(String),

    /// Array-side session could not be established
    #[error("Offload prepare failed: {0}")]
    Prepare(String),

    /// Array-side copy failed
    #[error("Offload copy failed: {0}")]
    Copy(String),

    /// Array-side resources could not be released
    #[error("Offload finalize failed: {0}")]
    Finalize(String),

    /// CA file reference could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
