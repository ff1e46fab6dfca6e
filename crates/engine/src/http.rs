//! HTTP plumbing: client construction, HEAD probing and redirect
//! resolution.

use std::collections::HashSet;

use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::HttpOptions;
use crate::error::DownloadError;
use crate::plan::ChunkRange;

const USER_AGENT: &str = concat!("downpour/", env!("CARGO_PKG_VERSION"));

/// Builds the session client.
///
/// Redirects are resolved manually so the terminal URL can be reported
/// and loops detected, hence `Policy::none()`.
pub(crate) fn build_client(options: &HttpOptions) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(Policy::none());
    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(DownloadError::from)
}

/// Issues a single HEAD for `url` with the caller's headers.
pub(crate) async fn probe(
    client: &Client,
    url: &Url,
    options: &HttpOptions,
) -> Result<Response, DownloadError> {
    let response = client
        .request(Method::HEAD, url.clone())
        .headers(options.headers.clone())
        .send()
        .await?;
    Ok(response)
}

/// Issues the body request for one chunk, with a `Range` header when a
/// range is planned.
pub(crate) async fn fetch(
    client: &Client,
    url: &Url,
    options: &HttpOptions,
    range: Option<ChunkRange>,
) -> Result<Response, DownloadError> {
    let mut request = client
        .request(options.method.clone(), url.clone())
        .headers(options.headers.clone());
    if let Some(range) = range {
        request = request.header(RANGE, range.header_value());
    }
    Ok(request.send().await?)
}

/// Chases redirect responses via HEAD probes until a terminal URL answers.
///
/// Returns the terminal URL and, when it answered 200 or 206, its
/// headers. A chain that ends on some other status after at least one hop
/// is returned without headers so the download may still try a GET. A URL
/// seen twice is a redirect loop and fails the session.
pub(crate) async fn resolve_redirects(
    client: &Client,
    url: Url,
    options: &HttpOptions,
) -> Result<(Url, Option<HeaderMap>), DownloadError> {
    let mut visited = HashSet::new();
    let mut current = url;
    let mut hops = 0usize;
    loop {
        if !visited.insert(current.to_string()) {
            return Err(DownloadError::RedirectLoop(current.to_string()));
        }
        let response = probe(client, &current, options).await?;
        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
            return Ok((current, Some(response.headers().clone())));
        }
        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or(DownloadError::MissingLocation(status.as_u16()))?;
            current = current
                .join(location)
                .map_err(|err| DownloadError::InvalidUrl(err.to_string()))?;
            debug!(hops, url = %current, "following redirect");
            hops += 1;
            continue;
        }
        if hops > 0 {
            // the chain went somewhere; let the body request decide
            return Ok((current, None));
        }
        return Err(DownloadError::BadStatus {
            status: status.as_u16(),
            url: current.to_string(),
        });
    }
}

/// Reads `content-length` out of a header map.
pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

/// True when the server advertises byte-range support.
pub(crate) fn accepts_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("bytes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_content_length_parses_digits_only() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1024"));
        assert_eq!(content_length(&headers), Some(1024));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("nope"));
        assert_eq!(content_length(&headers), None);
    }

    #[test]
    fn test_accepts_ranges_requires_bytes() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_ranges(&headers));

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!accepts_ranges(&headers));

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("Bytes"));
        assert!(accepts_ranges(&headers));
    }
}
