//! Removal of orphan chunk files left behind by failed or destroyed
//! sessions.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::DownloadError;

/// True for names shaped like `<file>.$$<id>` or `<file>.$$<id>$PART`.
fn is_chunk_file(name: &str) -> bool {
    let Some(pos) = name.rfind(".$$") else {
        return false;
    };
    if pos == 0 {
        return false; // needs a non-empty stem
    }
    let tail = &name[pos + 3..];
    let digits = tail.strip_suffix("$PART").unwrap_or(tail);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Scans `dir` and deletes every chunk file in it.
///
/// Returns the removed paths, sorted. Only plain files with the chunk
/// naming shape are touched.
pub async fn clean_chunk_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, DownloadError> {
    let mut removed = Vec::new();
    let mut entries = fs::read_dir(dir.as_ref()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_chunk_file(name) {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        fs::remove_file(entry.path()).await?;
        debug!(path = %entry.path().display(), "removed orphan chunk file");
        removed.push(entry.path());
    }
    removed.sort();
    Ok(removed)
}
