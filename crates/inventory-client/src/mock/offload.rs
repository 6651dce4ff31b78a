//! Mock offload driver
//!
//! Emits a fixed progress sequence and records session lifecycle calls.

use crate::error::OffloadError;
use crate::offload::{OffloadDriver, OffloadSession, TargetVolume};
use crds::StorageVendorProduct;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Mock OffloadDriver for testing
#[derive(Debug, Clone)]
pub struct MockOffloadDriver {
    vendor: StorageVendorProduct,
    progress: Vec<u8>,
    fail_prepare: bool,
    pub(crate) prepared: Arc<Mutex<Vec<String>>>,
    pub(crate) finalized: Arc<Mutex<Vec<String>>>,
}

impl MockOffloadDriver {
    /// Create a driver that reports `progress` then closes the channel
    pub fn new(vendor: StorageVendorProduct, progress: Vec<u8>) -> Self {
        Self {
            vendor,
            progress,
            fail_prepare: false,
            prepared: Arc::new(Mutex::new(Vec::new())),
            finalized: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make `prepare` fail
    pub fn failing(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    /// Source disks prepared so far
    pub fn prepared(&self) -> Vec<String> {
        self.prepared.lock().unwrap().clone()
    }

    /// Session ids finalized so far
    pub fn finalized(&self) -> Vec<String> {
        self.finalized.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl OffloadDriver for MockOffloadDriver {
    fn vendor(&self) -> StorageVendorProduct {
        self.vendor
    }

    async fn prepare(&self, source_disk: &str, target: &TargetVolume) -> Result<OffloadSession, OffloadError> {
        if self.fail_prepare {
            return Err(OffloadError::Prepare(format!("array rejected {source_disk}")));
        }
        let mut prepared = self.prepared.lock().unwrap();
        prepared.push(source_disk.to_string());
        Ok(OffloadSession {
            id: format!("session-{}", prepared.len()),
            vendor: self.vendor,
            source_disk: source_disk.to_string(),
            target: target.clone(),
            state: BTreeMap::new(),
        })
    }

    async fn copy(&self, _session: &OffloadSession) -> Result<mpsc::Receiver<u8>, OffloadError> {
        let (tx, rx) = mpsc::channel(self.progress.len().max(1));
        let progress = self.progress.clone();
        tokio::spawn(async move {
            for p in progress {
                if tx.send(p).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn finalize(&self, session: OffloadSession) -> Result<(), OffloadError> {
        self.finalized.lock().unwrap().push(session.id);
        Ok(())
    }
}
