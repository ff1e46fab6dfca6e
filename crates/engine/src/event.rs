//! Typed lifecycle events and the subscriber bus behind them.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::DownloadError;

/// Byte progress of one chunk, or of the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct ChunkProgress {
    /// Bytes written so far
    pub bytes: u64,
    /// Completion percentage, 0 to 100
    pub percentage: f64,
    /// Transfer speed in bytes per second over the last report window
    pub speed: f64,
}

/// Aggregate plus per-chunk progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub total: ChunkProgress,
    pub details: Vec<ChunkProgress>,
}

/// Session facts, emitted once the response headers are resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    /// Total size in bytes, when the server reported one
    pub size: Option<u64>,
    /// Planned length of every chunk; empty in single mode
    pub chunks: Vec<u64>,
    /// Whether chunk files from an earlier session were reused
    pub is_resume: bool,
    /// Starting percentage of every chunk
    pub progress: Vec<f64>,
    /// URL after redirect resolution
    pub final_address: String,
    /// Whether the session downloads byte ranges in parallel
    pub parallel: bool,
    /// Whether the session can resume across restarts
    pub resumable: bool,
    /// Response headers of the probe
    pub headers: BTreeMap<String, String>,
    /// Resolved destination path
    pub saved_file_path: String,
}

/// Everything a download session reports to its observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// Resolved headers, plan and resume facts; at most once, before any progress
    Metadata(Metadata),
    /// Throttled byte counters
    Progress(ProgressReport),
    /// One failed attempt on a chunk
    Retry {
        chunk_id: usize,
        attempt: usize,
        error: DownloadError,
    },
    /// Assembly progress
    Build { percentage: f64 },
    /// The output file is complete
    End,
    /// Fatal failure
    Error(DownloadError),
    /// Final signal; fires exactly once on success, failure or destroy
    Close,
}

struct BusState {
    subscribers: Vec<mpsc::UnboundedSender<DownloadEvent>>,
    closed: bool,
}

/// Fan-out event channel with close-exactly-once semantics.
///
/// After `close` the bus delivers nothing further; late subscribers
/// receive a single `Close` so waiters never hang.
pub(crate) struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        if state.closed {
            let _ = tx.send(DownloadEvent::Close);
        } else {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Delivers an event to every live subscriber, unless the bus is closed.
    pub(crate) fn emit(&self, event: DownloadEvent) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Emits the final `Close` and seals the bus. Idempotent.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(DownloadEvent::Close);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}
