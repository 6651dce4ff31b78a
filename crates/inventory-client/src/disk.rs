//! Readable disk byte streams

use crate::error::InventoryError;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncReadExt;

const FILE_CHUNK: usize = 4 * 1024 * 1024;

/// Completion step run once the stream is drained (e.g. closing an image transfer)
pub type Finisher = Pin<Box<dyn Future<Output = Result<(), InventoryError>> + Send>>;

enum Body {
    File(tokio::fs::File),
    Http(reqwest::Response),
    Memory(Vec<u8>),
}

/// A disk's contents as a stream of chunks with a known total length
pub struct DiskStream {
    len: u64,
    body: Body,
    finisher: Option<Finisher>,
}

impl fmt::Debug for DiskStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.body {
            Body::File(_) => "file",
            Body::Http(_) => "http",
            Body::Memory(_) => "memory",
        };
        f.debug_struct("DiskStream")
            .field("len", &self.len)
            .field("body", &kind)
            .finish_non_exhaustive()
    }
}

impl DiskStream {
    /// Open a local file (OVA members, mounted exports).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, InventoryError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            len,
            body: Body::File(file),
            finisher: None,
        })
    }

    /// Wrap a successful HTTP response; the length comes from Content-Length
    /// unless given explicitly.
    pub fn from_response(response: reqwest::Response, len: Option<u64>) -> Result<Self, InventoryError> {
        let len = len.or(response.content_length()).ok_or_else(|| {
            InventoryError::SourceSchema(format!("{} has no content length", response.url()))
        })?;
        Ok(Self {
            len,
            body: Body::Http(response),
            finisher: None,
        })
    }

    /// In-memory stream, used by mocks.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            len: bytes.len() as u64,
            body: Body::Memory(bytes),
            finisher: None,
        }
    }

    /// Attach a completion step, awaited by [`DiskStream::finish`].
    pub fn with_finisher(mut self, finisher: Finisher) -> Self {
        self.finisher = Some(finisher);
        self
    }

    /// Total bytes the stream will yield
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Next chunk, or `None` once exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, InventoryError> {
        match &mut self.body {
            Body::File(file) => {
                let mut buf = vec![0u8; FILE_CHUNK];
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some(buf))
            }
            Body::Http(response) => Ok(response
                .chunk()
                .await
                .map_err(|e| InventoryError::SourceUnavailable(format!("reading disk: {e}")))?
                .map(|b| b.to_vec())),
            Body::Memory(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let take = bytes.len().min(FILE_CHUNK);
                Ok(Some(bytes.drain(..take).collect()))
            }
        }
    }

    /// Run the completion step, if any.
    pub async fn finish(mut self) -> Result<(), InventoryError> {
        match self.finisher.take() {
            Some(finisher) => finisher.await,
            None => Ok(()),
        }
    }
}
