//! Resumable, multi-connection HTTP/HTTPS file downloads.
//!
//! A [`Download`] session splits a remote resource into byte-range chunks,
//! fetches them over parallel connections, persists every chunk next to
//! the destination file and stitches them together once the last range
//! has landed. The chunk files double as a resume manifest: a new session
//! over the same destination reuses whatever completed chunks it finds
//! and only downloads the rest.
//!
//! Servers that do not advertise `Accept-Ranges: bytes` (or hide the
//! content length) are handled with a plain single-connection transfer.
//!
//! ```no_run
//! use downpour::{Download, DownloadOptions};
//!
//! # async fn example() -> Result<(), downpour::DownloadError> {
//! let download = Download::new(
//!     "https://example.com/big.iso",
//!     "/tmp/big.iso",
//!     DownloadOptions::default(),
//! );
//! let finished = download.wait().await?;
//! assert!(finished);
//! # Ok(())
//! # }
//! ```

mod assemble;
mod cleanup;
mod config;
mod dest;
mod download;
mod error;
mod event;
mod http;
mod plan;
mod progress;
mod resume;
mod worker;

pub use cleanup::clean_chunk_files;
pub use config::{ChunkSize, DownloadOptions, ExistBehavior, HttpOptions};
pub use download::Download;
pub use error::DownloadError;
pub use event::{ChunkProgress, DownloadEvent, Metadata, ProgressReport};
pub use plan::{plan_chunks, ChunkRange};
