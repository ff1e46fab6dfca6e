//! Serial concatenation of completed chunk files into the destination.

use std::path::Path;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{self, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dest::chunk_path;
use crate::error::DownloadError;
use crate::event::{DownloadEvent, EventBus};

/// Streams every chunk file into `dest` in order, then removes them.
///
/// Emits `Build` after each chunk and `End` once the output is whole;
/// the caller owns the final `Close`. Any I/O failure aborts assembly
/// with the chunk files retained, so a later session can resume.
pub(crate) async fn assemble(
    bus: &EventBus,
    cancel: &CancellationToken,
    dest: &Path,
    total_chunks: usize,
) -> Result<bool, DownloadError> {
    let mut output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(dest)
        .await?;

    for id in 0..total_chunks {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let mut chunk = File::open(chunk_path(dest, id)).await?;
        io::copy(&mut chunk, &mut output).await?;
        bus.emit(DownloadEvent::Build {
            percentage: id as f64 * 100.0 / total_chunks as f64,
        });
    }
    output.flush().await?;
    drop(output);

    for id in 0..total_chunks {
        fs::remove_file(chunk_path(dest, id)).await?;
    }
    debug!(path = %dest.display(), chunks = total_chunks, "assembly complete");
    bus.emit(DownloadEvent::End);
    Ok(true)
}
