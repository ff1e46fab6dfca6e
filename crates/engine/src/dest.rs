//! Destination path resolution and on-disk chunk naming.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use url::Url;

use crate::config::ExistBehavior;
use crate::error::DownloadError;

/// Derives a filename from the last URL path segment.
fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "download".to_string())
}

/// `report.pdf` becomes `report(COPY).pdf`.
fn copy_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}(COPY).{}", ext.to_string_lossy()),
        None => format!("{stem}(COPY)"),
    };
    path.with_file_name(name)
}

/// The parent of the resolved destination must already exist as a directory.
async fn validate_parent(path: &Path) -> Result<(), DownloadError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match fs::metadata(&parent).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(DownloadError::InvalidDestination(format!(
            "{} is not a directory",
            parent.display()
        ))),
        Err(_) => Err(DownloadError::InvalidDestination(format!(
            "{} does not exist",
            parent.display()
        ))),
    }
}

/// Normalizes the caller-supplied destination to a writable file path.
///
/// A directory is completed with a filename derived from the URL. An
/// existing file is handled per the `ExistBehavior` policy; `Ignore`
/// yields `None`, which ends the session without downloading anything.
pub(crate) async fn resolve_destination(
    url: &Url,
    dest: &Path,
    behavior: ExistBehavior,
) -> Result<Option<PathBuf>, DownloadError> {
    let mut candidate = dest.to_path_buf();
    loop {
        let meta = match fs::metadata(&candidate).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => break,
            Err(err) => return Err(err.into()),
        };
        if meta.is_dir() {
            candidate.push(filename_from_url(url));
            continue;
        }
        match behavior {
            ExistBehavior::NewFile => candidate = copy_name(&candidate),
            ExistBehavior::Overwrite => break,
            ExistBehavior::Ignore => return Ok(None),
        }
    }
    validate_parent(&candidate).await?;
    debug!(path = %candidate.display(), "destination resolved");
    Ok(Some(candidate))
}

/// Completed chunk file: `<dest>.$$<id>`.
pub(crate) fn chunk_path(dest: &Path, id: usize) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(format!(".$${id}"));
    PathBuf::from(name)
}

/// In-flight chunk file for the current attempt: `<dest>.$$<id>$PART`.
pub(crate) fn part_path(dest: &Path, id: usize) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(format!(".$${id}$PART"));
    PathBuf::from(name)
}
