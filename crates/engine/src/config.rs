//! Session configuration and defaults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistBehavior {
    /// Keep the existing file and save under a `(COPY)` suffixed name
    #[default]
    NewFile,
    /// Truncate and replace the existing file
    Overwrite,
    /// Leave the existing file alone and end the session silently
    Ignore,
}

/// Chunk size policy: a fixed byte count, or a function of the total size.
#[derive(Clone)]
pub enum ChunkSize {
    Fixed(u64),
    Computed(Arc<dyn Fn(u64) -> u64 + Send + Sync>),
}

impl ChunkSize {
    /// Resolves the policy for a file of `size` bytes.
    pub fn resolve(&self, size: u64) -> u64 {
        match self {
            ChunkSize::Fixed(bytes) => *bytes,
            ChunkSize::Computed(f) => f(size),
        }
    }
}

impl Default for ChunkSize {
    /// A tenth of the file, capped at 10 MiB.
    fn default() -> Self {
        ChunkSize::Computed(Arc::new(|size| (size / 10).min(10 * 1024 * 1024)))
    }
}

impl fmt::Debug for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkSize::Fixed(bytes) => f.debug_tuple("Fixed").field(bytes).finish(),
            ChunkSize::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Options forwarded to every HTTP request of the session.
///
/// Probes always use HEAD; `method` only applies to body transfers.
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// Request method for body transfers
    pub method: Method,
    /// Extra request headers
    pub headers: HeaderMap,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

/// Immutable per-session configuration.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Number of parallel connections
    pub connections: usize,
    /// Behavior when the destination file already exists
    pub exist_behavior: ExistBehavior,
    /// Chase redirect responses before downloading
    pub follow_redirect: bool,
    /// Options applied to every request
    pub http: HttpOptions,
    /// Chunk size policy
    pub chunk_size: ChunkSize,
    /// Retries per chunk before the session fails
    pub max_retry: usize,
    /// Base delay before a retry
    pub retry_delay: Duration,
    /// Additional delay added per prior failed attempt
    pub retry_backoff: Duration,
    /// Minimum interval between progress emissions
    pub report_interval: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connections: 5,
            exist_behavior: ExistBehavior::default(),
            follow_redirect: true,
            http: HttpOptions::default(),
            chunk_size: ChunkSize::default(),
            max_retry: 3,
            retry_delay: Duration::from_millis(2000),
            retry_backoff: Duration::from_millis(3000),
            report_interval: Duration::from_millis(2500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_defaults() {
        let options = DownloadOptions::default();
        assert_eq!(options.connections, 5);
        assert_eq!(options.exist_behavior, ExistBehavior::NewFile);
        assert!(options.follow_redirect);
        assert_eq!(options.max_retry, 3);
        assert_eq!(options.retry_delay, Duration::from_millis(2000));
        assert_eq!(options.retry_backoff, Duration::from_millis(3000));
        assert_eq!(options.report_interval, Duration::from_millis(2500));
    }

    #[test]
    fn test_default_chunk_size_is_tenth_capped_at_ten_mib() {
        let policy = ChunkSize::default();
        assert_eq!(policy.resolve(1000), 100);
        assert_eq!(policy.resolve(400 * 1024 * 1024), 10 * 1024 * 1024);
    }

    #[test]
    fn test_fixed_chunk_size_ignores_total() {
        let policy = ChunkSize::Fixed(4096);
        assert_eq!(policy.resolve(1), 4096);
        assert_eq!(policy.resolve(u64::MAX), 4096);
    }

    #[test]
    fn test_http_options_default_method_is_get() {
        assert_eq!(HttpOptions::default().method, Method::GET);
    }
}
