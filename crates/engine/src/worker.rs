//! Per-chunk workers: the attempt loop, retry backoff and atomic
//! completion via rename.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::config::DownloadOptions;
use crate::dest::{chunk_path, part_path};
use crate::error::DownloadError;
use crate::event::{DownloadEvent, EventBus};
use crate::http;
use crate::plan::ChunkRange;
use crate::progress::ProgressTracker;

/// Everything a chunk worker needs, shared across the pool.
pub(crate) struct WorkerContext {
    pub client: Client,
    pub address: Url,
    pub dest: PathBuf,
    pub options: DownloadOptions,
    pub bus: Arc<EventBus>,
    pub cancel: CancellationToken,
    pub progress: Arc<Mutex<ProgressTracker>>,
}

/// Linear backoff: `retry_delay + retry_backoff * (attempt - 1)`.
fn retry_delay(options: &DownloadOptions, attempt: usize) -> Duration {
    options.retry_delay + options.retry_backoff * (attempt as u32 - 1)
}

enum Attempt {
    Done,
    Cancelled,
}

/// Downloads one chunk, retrying transient failures until the attempts
/// are spent.
///
/// Returns `Ok(true)` when the chunk file landed, `Ok(false)` when the
/// session was destroyed mid-transfer, and an error only once
/// `max_retry` retries are exhausted.
pub(crate) async fn run_chunk(
    ctx: &WorkerContext,
    id: usize,
    range: Option<ChunkRange>,
) -> Result<bool, DownloadError> {
    let mut attempt = 1usize;
    loop {
        match attempt_chunk(ctx, id, range).await {
            Ok(Attempt::Done) => {
                let report = ctx.progress.lock().unwrap().finish_chunk(id);
                ctx.bus.emit(DownloadEvent::Progress(report));
                debug!(chunk = id, attempt, "chunk complete");
                return Ok(true);
            }
            Ok(Attempt::Cancelled) => return Ok(false),
            Err(error) => {
                if ctx.cancel.is_cancelled() {
                    return Ok(false);
                }
                if attempt > ctx.options.max_retry {
                    let range = match range {
                        Some(range) => range.header_value(),
                        None => "whole file".to_string(),
                    };
                    return Err(DownloadError::ChunkExhausted { chunk: id, range });
                }
                debug!(chunk = id, attempt, %error, "attempt failed, backing off");
                ctx.bus.emit(DownloadEvent::Retry {
                    chunk_id: id,
                    attempt,
                    error,
                });
                let delay = retry_delay(&ctx.options, attempt);
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Ok(false),
                    _ = sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// One end-to-end transfer of a chunk into its `$PART` file, renamed to
/// the final chunk file on success.
async fn attempt_chunk(
    ctx: &WorkerContext,
    id: usize,
    range: Option<ChunkRange>,
) -> Result<Attempt, DownloadError> {
    ctx.progress.lock().unwrap().reset_chunk(id);

    let response = tokio::select! {
        _ = ctx.cancel.cancelled() => return Ok(Attempt::Cancelled),
        response = http::fetch(&ctx.client, &ctx.address, &ctx.options.http, range) => response?,
    };

    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::BadStatus {
            status: status.as_u16(),
            url: ctx.address.to_string(),
        });
    }
    if range.is_some() && status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::RangeNotHonored {
            chunk: id,
            status: status.as_u16(),
        });
    }
    let declared = http::content_length(response.headers());
    match (range, declared) {
        (Some(range), Some(declared)) if declared != range.size() => {
            return Err(DownloadError::LengthMismatch {
                chunk: id,
                expected: range.size(),
                actual: declared,
            });
        }
        (None, Some(declared)) => {
            // a whole-file transfer just learned the size
            ctx.progress.lock().unwrap().adopt_total_size(declared);
        }
        _ => {}
    }

    let part = part_path(&ctx.dest, id);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&part)
        .await?;

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(Attempt::Cancelled),
            next = stream.next() => next,
        };
        let Some(bytes) = next else { break };
        let bytes = bytes?;
        // the write completes before the next read, so the file drains
        // as fast as it can and no unbounded buffer builds up
        file.write_all(&bytes).await?;
        written += bytes.len() as u64;
        let report = ctx
            .progress
            .lock()
            .unwrap()
            .record(id, bytes.len() as u64, false);
        if let Some(report) = report {
            ctx.bus.emit(DownloadEvent::Progress(report));
        }
    }
    file.flush().await?;
    drop(file);

    if ctx.cancel.is_cancelled() {
        return Ok(Attempt::Cancelled);
    }

    // a short body is not trusted; the attempt is repeated from scratch
    if let Some(expected) = range.map(|r| r.size()).or(declared) {
        if written != expected {
            return Err(DownloadError::LengthMismatch {
                chunk: id,
                expected,
                actual: written,
            });
        }
    }

    fs::rename(&part, chunk_path(&ctx.dest, id)).await?;
    Ok(Attempt::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_schedule_is_linear() {
        let options = DownloadOptions::default();
        assert_eq!(retry_delay(&options, 1), Duration::from_millis(2000));
        assert_eq!(retry_delay(&options, 2), Duration::from_millis(5000));
        assert_eq!(retry_delay(&options, 3), Duration::from_millis(8000));
    }
}
