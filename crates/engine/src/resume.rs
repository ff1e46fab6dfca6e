//! Classification of on-disk chunk files left by earlier sessions.

use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::dest::chunk_path;
use crate::error::DownloadError;
use crate::plan::ChunkRange;

/// Outcome of scanning the planned chunks against the filesystem.
#[derive(Debug, Default)]
pub(crate) struct ResumeScan {
    /// Chunk ids that still need a transfer
    pub pending: Vec<usize>,
    /// Chunk ids whose final file is already on disk with the right size
    pub complete: Vec<usize>,
}

impl ResumeScan {
    pub(crate) fn is_resume(&self) -> bool {
        !self.complete.is_empty()
    }
}

/// Stats every planned chunk file and classifies it.
///
/// A file matching its range length is trusted as complete. A larger file
/// means the disk state belongs to a different plan, which the session
/// cannot recover from. A shorter file is deleted and re-downloaded
/// whole; the server stays the source of truth for partial data.
pub(crate) async fn scan_chunks(
    dest: &Path,
    plan: &[ChunkRange],
) -> Result<ResumeScan, DownloadError> {
    let mut scan = ResumeScan::default();
    for (id, range) in plan.iter().enumerate() {
        let path = chunk_path(dest, id);
        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                scan.pending.push(id);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if size == range.size() {
            debug!(chunk = id, size, "reusing completed chunk file");
            scan.complete.push(id);
        } else if size > range.size() {
            return Err(DownloadError::OnDiskInconsistency(
                path.display().to_string(),
            ));
        } else {
            warn!(
                chunk = id,
                size,
                expected = range.size(),
                "discarding undersized chunk file"
            );
            fs::remove_file(&path).await?;
            scan.pending.push(id);
        }
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan_chunks;

    #[tokio::test]
    async fn test_scan_with_no_files_enqueues_everything() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let plan = plan_chunks(1000, 4, 250);

        let scan = scan_chunks(&dest, &plan).await.unwrap();
        assert_eq!(scan.pending, vec![0, 1, 2, 3]);
        assert!(scan.complete.is_empty());
        assert!(!scan.is_resume());
    }

    #[tokio::test]
    async fn test_scan_trusts_exact_size_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let plan = plan_chunks(1000, 4, 250);
        std::fs::write(chunk_path(&dest, 0), vec![0u8; 250]).unwrap();
        std::fs::write(chunk_path(&dest, 2), vec![0u8; 250]).unwrap();

        let scan = scan_chunks(&dest, &plan).await.unwrap();
        assert_eq!(scan.pending, vec![1, 3]);
        assert_eq!(scan.complete, vec![0, 2]);
        assert!(scan.is_resume());
    }

    #[tokio::test]
    async fn test_scan_deletes_undersized_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let plan = plan_chunks(1000, 4, 250);
        let short = chunk_path(&dest, 1);
        std::fs::write(&short, vec![0u8; 100]).unwrap();

        let scan = scan_chunks(&dest, &plan).await.unwrap();
        assert_eq!(scan.pending, vec![0, 1, 2, 3]);
        assert!(!short.exists());
    }

    #[tokio::test]
    async fn test_scan_rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let plan = plan_chunks(1000, 4, 250);
        std::fs::write(chunk_path(&dest, 1), vec![0u8; 300]).unwrap();

        let result = scan_chunks(&dest, &plan).await;
        assert!(matches!(
            result,
            Err(DownloadError::OnDiskInconsistency(_))
        ));
    }
}
