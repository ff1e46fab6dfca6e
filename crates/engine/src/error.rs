//! Error types for download sessions.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during a download session.
///
/// Variants carry plain values instead of wrapped sources so errors stay
/// cloneable and can travel through the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum DownloadError {
    /// Invalid URL
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// A redirect chain revisited a URL it had already seen
    #[error("redirect loop detected at {0}")]
    RedirectLoop(String),
    /// A redirect response carried no `location` header
    #[error("redirect status {0} without a location header")]
    MissingLocation(u16),
    /// The server answered with a status the download cannot proceed from
    #[error("unexpected status {status} from {url}")]
    BadStatus { status: u16, url: String },
    /// The advertised content length disagrees with the planned range
    #[error("chunk #{chunk}: content length {actual} does not match expected {expected}")]
    LengthMismatch {
        chunk: usize,
        expected: u64,
        actual: u64,
    },
    /// A range request was answered with a plain 200 instead of 206
    #[error("chunk #{chunk}: server ignored range request (status {status})")]
    RangeNotHonored { chunk: usize, status: u16 },
    /// The destination path cannot hold the download
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    /// Network-related error
    #[error("network error: {0}")]
    Network(String),
    /// File I/O error
    #[error("file error: {0}")]
    Filesystem(String),
    /// A chunk ran out of retry attempts
    #[error("failed to download chunk #{chunk} [{range}]")]
    ChunkExhausted { chunk: usize, range: String },
    /// An on-disk chunk file is larger than the range it belongs to
    #[error("chunk file {0} is larger than its planned range")]
    OnDiskInconsistency(String),
    /// The session was destroyed before completing
    #[error("download destroyed")]
    Destroyed,
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::Filesystem(err.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_names_chunk_and_range() {
        let err = DownloadError::ChunkExhausted {
            chunk: 3,
            range: "bytes=750-999".to_string(),
        };
        assert_eq!(err.to_string(), "failed to download chunk #3 [bytes=750-999]");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DownloadError = io.into();
        assert!(matches!(err, DownloadError::Filesystem(_)));
    }
}
