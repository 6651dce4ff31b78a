//! Worker errors

use inventory_client::{InventoryError, OffloadError};
use thiserror::Error;

/// Errors that end a populate run
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Command line did not describe a runnable job
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Source disk could not be read
    #[error("Source error: {0}")]
    Source(#[from] InventoryError),

    /// Array-side copy failed
    #[error("Offload error: {0}")]
    Offload(#[from] OffloadError),

    /// Source does not fit the target volume
    #[error("Source is {source_len} bytes but the target holds {target_len}")]
    TargetTooSmall { source_len: u64, target_len: u64 },

    /// Source ended before its declared length
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// Target volume could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl WorkerError {
    /// Whether a new worker pod may succeed where this one failed
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_retriable(),
            Self::Offload(OffloadError::Copy(_) | OffloadError::Prepare(_)) => true,
            Self::ShortRead { .. } | Self::Io(_) => true,
            _ => false,
        }
    }
}
