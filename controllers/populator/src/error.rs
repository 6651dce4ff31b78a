//! Populator controller errors.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur while populating a PVC.
#[derive(Debug, Error)]
pub enum PopulatorError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Populator request named by `dataSourceRef` is missing or unusable
    #[error("Source unresolvable: {0}")]
    SourceUnresolvable(String),

    /// The populated volume is claimed by an unrelated PVC
    #[error("Bind conflict: {0}")]
    BindConflict(String),

    /// Worker pod failed more often than the restart limit allows
    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    /// Stale resourceVersion on a guarded write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Worker metrics endpoint answered with an error
    #[error("Progress scrape failed: {0}")]
    Scrape(String),

    /// Progress endpoint request failed
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

impl PopulatorError {
    /// Event reason for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SourceUnresolvable(_) => "SourceUnresolvable",
            Self::BindConflict(_) => "BindConflict",
            Self::WorkerFailed(_) => "WorkerFailed",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::Conflict(_) => "Conflict",
            Self::Kube(_) | Self::Scrape(_) | Self::Http(_) | Self::Serialization(_) | Self::Watch(_) => "Failed",
        }
    }

    /// Whether another pass may succeed without a change to the PVC
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::BindConflict(_) | Self::WorkerFailed(_) | Self::InvalidConfig(_))
    }
}
