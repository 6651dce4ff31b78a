//! Byte-stream copy into the target volume
//!
//! Every source byte is written, zeros included: the target may hold stale
//! data from a previous attempt. A sync pass instead compares the source with
//! what the target already holds and rewrites only the blocks that differ.

use crate::error::WorkerError;
use inventory_client::DiskStream;
use prometheus::IntGauge;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

fn is_block_device(metadata: &std::fs::Metadata) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        metadata.file_type().is_block_device()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        false
    }
}

/// Open the target for writing. Block devices are written in place; image
/// files are truncated first.
pub async fn open_target(path: &Path) -> Result<File, WorkerError> {
    let block = match tokio::fs::metadata(path).await {
        Ok(metadata) => is_block_device(&metadata),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };
    let mut options = OpenOptions::new();
    options.write(true);
    if !block {
        options.create(true).truncate(true);
    }
    debug!("Opening target {} (block: {})", path.display(), block);
    Ok(options.open(path).await?)
}

/// Granularity of a sync pass
pub const SYNC_BLOCK: usize = 64 * 1024;

/// Open the target for an in-place sync; nothing is truncated.
pub async fn open_for_sync(path: &Path) -> Result<File, WorkerError> {
    debug!("Opening target {} for sync", path.display());
    Ok(OpenOptions::new().read(true).write(true).create(true).open(path).await?)
}

/// Outcome of a sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub scanned: u64,
    pub changed: u64,
}

/// Fill `buf` from `file`, returning how many bytes were available.
async fn read_full(file: &mut File, buf: &mut [u8]) -> Result<usize, WorkerError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Bring `target` in line with `stream`, writing only blocks whose content
/// differs.
pub async fn sync_stream(
    mut stream: DiskStream,
    target: &Path,
    pvc_size: Option<u64>,
    progress: &IntGauge,
) -> Result<SyncSummary, WorkerError> {
    let total = stream.len();
    if let Some(target_len) = pvc_size {
        if total > target_len {
            return Err(WorkerError::TargetTooSmall {
                source_len: total,
                target_len,
            });
        }
    }

    let mut file = open_for_sync(target).await?;
    let mut summary = SyncSummary::default();
    let mut current = vec![0u8; SYNC_BLOCK];
    progress.set(0);
    while let Some(chunk) = stream.next_chunk().await? {
        for block in chunk.chunks(SYNC_BLOCK) {
            let offset = summary.scanned;
            let held = read_full(&mut file, &mut current[..block.len()]).await?;
            if held < block.len() || current[..block.len()] != *block {
                file.seek(SeekFrom::Start(offset)).await?;
                file.write_all(block).await?;
                summary.changed += block.len() as u64;
            }
            summary.scanned += block.len() as u64;
        }
        progress.set(percent(summary.scanned, total));
    }
    file.flush().await?;
    file.sync_all().await?;

    if summary.scanned < total {
        return Err(WorkerError::ShortRead {
            expected: total,
            actual: summary.scanned,
        });
    }
    stream.finish().await?;
    progress.set(100);
    info!("Synced {} bytes, {} changed", summary.scanned, summary.changed);
    Ok(summary)
}

/// Whole percent of `total` that `done` represents.
pub fn percent(done: u64, total: u64) -> i64 {
    if total == 0 {
        return 100;
    }
    ((u128::from(done) * 100 / u128::from(total)).min(100)) as i64
}

/// Copy `stream` into `target`, updating `progress` as bytes land.
///
/// Returns the number of bytes written.
pub async fn copy_stream(
    mut stream: DiskStream,
    target: &Path,
    pvc_size: Option<u64>,
    progress: &IntGauge,
) -> Result<u64, WorkerError> {
    let total = stream.len();
    if let Some(target_len) = pvc_size {
        if total > target_len {
            return Err(WorkerError::TargetTooSmall {
                source_len: total,
                target_len,
            });
        }
    }

    let mut file = open_target(target).await?;
    let mut written: u64 = 0;
    let mut reported = -10;
    progress.set(0);
    while let Some(chunk) = stream.next_chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        let p = percent(written, total);
        progress.set(p);
        if p / 10 != reported / 10 {
            info!("Transferred {} of {} bytes ({}%)", written, total, p);
            reported = p;
        }
    }
    file.flush().await?;
    file.sync_all().await?;

    if written < total {
        return Err(WorkerError::ShortRead {
            expected: total,
            actual: written,
        });
    }
    stream.finish().await?;
    progress.set(100);
    Ok(written)
}
