//! Byte counters with windowed speed estimates and a throttled report rate.

use std::time::{Duration, Instant};

use crate::event::{ChunkProgress, ProgressReport};

/// One counter plus the reference snapshot its speed is computed against.
#[derive(Debug, Clone)]
struct Counter {
    bytes: u64,
    expected: u64,
    speed: f64,
    reference_bytes: u64,
    reference_time: Instant,
}

impl Counter {
    fn new(expected: u64) -> Self {
        Self {
            bytes: 0,
            expected,
            speed: 0.0,
            reference_bytes: 0,
            reference_time: Instant::now(),
        }
    }

    fn snapshot(&self) -> ChunkProgress {
        ChunkProgress {
            bytes: self.bytes,
            percentage: if self.expected > 0 {
                self.bytes as f64 * 100.0 / self.expected as f64
            } else {
                0.0
            },
            speed: self.speed,
        }
    }

    /// Recomputes `speed` over the window since the last snapshot, then
    /// resets the window.
    fn refresh(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.reference_time).as_secs_f64();
        if elapsed > 0.0 {
            self.speed = self.bytes.saturating_sub(self.reference_bytes) as f64 / elapsed;
        }
        self.reference_bytes = self.bytes;
        self.reference_time = now;
    }
}

/// Tracks every chunk counter plus the aggregate.
///
/// `record` only yields a report when the chunk's report window has
/// elapsed (or when forced), which keeps the emission rate bounded no
/// matter how small the body chunks arrive.
pub(crate) struct ProgressTracker {
    chunks: Vec<Counter>,
    total: Counter,
    interval: Duration,
}

impl ProgressTracker {
    pub(crate) fn new(chunk_lengths: &[u64], total_size: Option<u64>, interval: Duration) -> Self {
        Self {
            chunks: chunk_lengths.iter().map(|&len| Counter::new(len)).collect(),
            total: Counter::new(total_size.unwrap_or(0)),
            interval,
        }
    }

    /// Marks a chunk as already complete before any transfer starts.
    pub(crate) fn preload(&mut self, id: usize) {
        let len = self.chunks[id].expected;
        self.chunks[id].bytes = len;
        self.chunks[id].reference_bytes = len;
        self.total.bytes += len;
        self.total.reference_bytes += len;
    }

    /// Rolls a chunk's counters back before a fresh attempt.
    pub(crate) fn reset_chunk(&mut self, id: usize) {
        let bytes = self.chunks[id].bytes;
        self.total.bytes -= bytes;
        self.chunks[id].bytes = 0;
        self.chunks[id].reference_bytes = 0;
        self.chunks[id].reference_time = Instant::now();
    }

    /// Adopts a total size learned after planning, as happens when a
    /// whole-file transfer first sees `content-length`.
    pub(crate) fn adopt_total_size(&mut self, size: u64) {
        if self.total.expected == 0 {
            self.total.expected = size;
            if let [only] = self.chunks.as_mut_slice() {
                if only.expected == 0 {
                    only.expected = size;
                }
            }
        }
    }

    /// Records freshly written bytes for a chunk. Returns a report when
    /// the window elapsed or `force` is set.
    pub(crate) fn record(&mut self, id: usize, delta: u64, force: bool) -> Option<ProgressReport> {
        let now = Instant::now();
        self.chunks[id].bytes += delta;
        self.total.bytes += delta;
        if !force && now.duration_since(self.chunks[id].reference_time) <= self.interval {
            return None;
        }
        self.chunks[id].refresh(now);
        self.total.refresh(now);
        Some(self.report())
    }

    /// Force-flushes a completed chunk and zeroes its speed.
    pub(crate) fn finish_chunk(&mut self, id: usize) -> ProgressReport {
        let now = Instant::now();
        self.chunks[id].refresh(now);
        self.chunks[id].speed = 0.0;
        self.total.refresh(now);
        self.report()
    }

    pub(crate) fn report(&self) -> ProgressReport {
        ProgressReport {
            total: self.total.snapshot(),
            details: self.chunks.iter().map(Counter::snapshot).collect(),
        }
    }
}
