//! The download coordinator: destination resolution, header probing,
//! chunk planning, the bounded worker pool and final assembly.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::assemble;
use crate::config::DownloadOptions;
use crate::dest;
use crate::error::DownloadError;
use crate::event::{DownloadEvent, EventBus, Metadata};
use crate::http;
use crate::plan::plan_chunks;
use crate::progress::ProgressTracker;
use crate::resume;
use crate::worker::{self, WorkerContext};

/// A single resumable download session.
///
/// A session is cheap to construct and does nothing until
/// [`start`](Download::start). Observers should [`subscribe`](Download::subscribe)
/// before starting so they see the initial events; the await-style helpers
/// [`metadata`](Download::metadata) and [`wait`](Download::wait) take care
/// of that themselves.
pub struct Download {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    dest: PathBuf,
    options: DownloadOptions,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Download {
    /// Creates a session for `url` saving to `dest`. No I/O happens here.
    pub fn new(
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                dest: dest.into(),
                options,
                bus: Arc::new(EventBus::new()),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to the session's event stream.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        self.inner.bus.subscribe()
    }

    /// Spawns the session onto the current runtime.
    ///
    /// Calling again is a no-op. Starting a session that was already
    /// destroyed reports an error instead of running.
    pub fn start(&self) {
        if self.inner.cancel.is_cancelled() {
            self.inner
                .bus
                .emit(DownloadEvent::Error(DownloadError::Destroyed));
            return;
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(error) = run(&inner).await {
                inner.cancel.cancel();
                inner.bus.emit(DownloadEvent::Error(error));
                inner.bus.close();
            }
        });
    }

    /// Destroys the session: aborts every transfer, suppresses further
    /// events and fires the final `Close`. Chunk files stay on disk so a
    /// later session can resume. Idempotent.
    pub fn destroy(&self) {
        self.inner.cancel.cancel();
        self.inner.bus.close();
    }

    /// Starts the session if needed and resolves on the first `Metadata`.
    pub async fn metadata(&self) -> Result<Metadata, DownloadError> {
        let mut events = self.subscribe();
        self.start();
        while let Some(event) = events.recv().await {
            match event {
                DownloadEvent::Metadata(metadata) => return Ok(metadata),
                DownloadEvent::Error(error) => return Err(error),
                DownloadEvent::Close => return Err(DownloadError::Destroyed),
                _ => {}
            }
        }
        Err(DownloadError::Destroyed)
    }

    /// Starts the session if needed and resolves once it terminates.
    ///
    /// Returns whether the output file was fully built: `false` means the
    /// session closed without finishing, as with the `Ignore` policy or
    /// an explicit [`destroy`](Download::destroy).
    pub async fn wait(&self) -> Result<bool, DownloadError> {
        let mut events = self.subscribe();
        self.start();
        let mut ended = false;
        while let Some(event) = events.recv().await {
            match event {
                DownloadEvent::End => ended = true,
                DownloadEvent::Error(error) => return Err(error),
                DownloadEvent::Close => return Ok(ended),
                _ => {}
            }
        }
        Ok(ended)
    }
}

fn headers_to_map(headers: Option<&HeaderMap>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(headers) = headers {
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                map.insert(name.as_str().to_string(), value.to_string());
            }
        }
    }
    map
}

/// The start procedure. Any error returned here is fatal and reported by
/// the caller; `Ok` covers success, the `Ignore` policy and destruction.
async fn run(inner: &Arc<Inner>) -> Result<(), DownloadError> {
    let url = Url::parse(&inner.url).map_err(|err| DownloadError::InvalidUrl(err.to_string()))?;

    // settle where the bytes will land
    let Some(dest) =
        dest::resolve_destination(&url, &inner.dest, inner.options.exist_behavior).await?
    else {
        info!("destination exists and policy is ignore, nothing to do");
        inner.bus.close();
        return Ok(());
    };

    // probe for headers, chasing redirects when allowed
    let client = http::build_client(&inner.options.http)?;
    let (address, headers) = if inner.options.follow_redirect {
        http::resolve_redirects(&client, url, &inner.options.http).await?
    } else {
        let response = http::probe(&client, &url, &inner.options.http).await?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::BadStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        (url, Some(response.headers().clone()))
    };
    if inner.cancel.is_cancelled() {
        return Ok(());
    }

    // parallel mode needs a known size and byte-range support
    let size = headers.as_ref().and_then(http::content_length);
    let ranged = headers.as_ref().map(http::accepts_ranges).unwrap_or(false);
    let parallel = inner.options.connections != 1 && ranged && size.map_or(false, |s| s > 0);

    let plan = if parallel {
        let size = size.unwrap_or(0);
        let chunk_size = inner.options.chunk_size.resolve(size);
        plan_chunks(size, inner.options.connections, chunk_size)
    } else {
        Vec::new()
    };
    let total_chunks = if parallel { plan.len() } else { 1 };

    let scan = if parallel {
        resume::scan_chunks(&dest, &plan).await?
    } else {
        resume::ResumeScan {
            pending: vec![0],
            complete: Vec::new(),
        }
    };
    let is_resume = scan.is_resume();

    let lengths: Vec<u64> = if parallel {
        plan.iter().map(|range| range.size()).collect()
    } else {
        vec![size.unwrap_or(0)]
    };
    let mut tracker = ProgressTracker::new(&lengths, size, inner.options.report_interval);
    for &id in &scan.complete {
        tracker.preload(id);
    }

    info!(
        url = %address,
        path = %dest.display(),
        parallel,
        chunks = total_chunks,
        resumed = scan.complete.len(),
        "download starting"
    );
    inner.bus.emit(DownloadEvent::Metadata(Metadata {
        size,
        chunks: if parallel { lengths.clone() } else { Vec::new() },
        is_resume,
        progress: tracker
            .report()
            .details
            .iter()
            .map(|detail| detail.percentage)
            .collect(),
        final_address: address.to_string(),
        parallel,
        resumable: parallel,
        headers: headers_to_map(headers.as_ref()),
        saved_file_path: dest.display().to_string(),
    }));

    let ctx = Arc::new(WorkerContext {
        client,
        address,
        dest: dest.clone(),
        options: inner.options.clone(),
        bus: inner.bus.clone(),
        cancel: inner.cancel.clone(),
        progress: Arc::new(Mutex::new(tracker)),
    });

    if !scan.pending.is_empty() {
        // at most `connections` workers hold a permit at once; finished
        // chunks release theirs, which dispatches the next pending one
        let semaphore = Arc::new(Semaphore::new(inner.options.connections.max(1)));
        let mut workers = JoinSet::new();
        for &id in &scan.pending {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let range = if parallel { Some(plan[id]) } else { None };
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore never closes");
                worker::run_chunk(&ctx, id, range).await
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    debug!("worker observed destruction, winding down");
                    return Ok(());
                }
                Ok(Err(error)) => return Err(error),
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    return Err(DownloadError::Network(format!("worker task failed: {err}")))
                }
            }
        }
    }
    if inner.cancel.is_cancelled() {
        return Ok(());
    }

    // every chunk is on disk; stitch them together
    if assemble::assemble(&inner.bus, &inner.cancel, &dest, total_chunks).await? {
        inner.bus.close();
    }
    Ok(())
}
