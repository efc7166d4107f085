//! HTTP client wrapper shared by the upload and download executors.
//!
//! One [`HttpClient`] is built per engine and cloned into each executor so
//! both directions share a connection pool. All non-success statuses are
//! turned into [`TransferError`]s here, so executors only see good responses.

use std::time::Duration;

use reqwest::header::{ACCEPT_RANGES, AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, FILE_PATH_HEADER, READ_TIMEOUT_SECS};
use super::error::TransferError;

/// Timeouts and credentials for [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Maximum idle time between body reads.
    pub read_timeout: Duration,
    /// Bearer token attached to every request, if set.
    pub auth_token: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            auth_token: None,
        }
    }
}

/// HTTP client for streaming transfers to and from the remote store.
///
/// # Example
///
/// ```no_run
/// use transferq_core::transfer::{ClientOptions, HttpClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new(&ClientOptions::default())?;
/// let response = client.get("https://store.example/files/a.bin", Some(1024)).await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    auth_token: Option<String>,
}

impl HttpClient {
    /// Builds a client with the given timeouts.
    ///
    /// A read timeout (rather than a whole-request timeout) is used so large
    /// transfers are bounded by stalls, not by their total duration.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot initialise.
    #[instrument(level = "debug", skip(options), fields(connect = ?options.connect_timeout, read = ?options.read_timeout))]
    pub fn new(options: &ClientOptions) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.read_timeout)
            .user_agent(default_user_agent())
            .build()?;

        Ok(Self {
            client,
            auth_token: options.auth_token.clone().filter(|token| !token.is_empty()),
        })
    }

    /// Issues a GET, asking for bytes from `range_start` onward when set.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] for network failures and non-success statuses.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str, range_start: Option<u64>) -> Result<Response, TransferError> {
        let mut request = self.authorize(self.client.get(url));
        if let Some(start) = range_start {
            request = request.header(RANGE, format!("bytes={start}-"));
        }
        self.send(url, request).await
    }

    /// Streams `body` to `url` with a PUT, naming the destination in the `File-Path` header.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] for network failures and non-success statuses.
    #[instrument(skip(self, body), fields(url = %url, bytes = content_length))]
    pub async fn put_file(
        &self,
        url: &str,
        remote_path: &str,
        body: Body,
        content_length: u64,
    ) -> Result<Response, TransferError> {
        let request = self
            .authorize(self.client.put(url))
            .header(FILE_PATH_HEADER, urlencoding::encode(remote_path).as_ref())
            .header(CONTENT_LENGTH, content_length)
            .body(body);
        self.send(url, request).await
    }

    /// POSTs a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] for network failures and non-success statuses.
    #[instrument(level = "debug", skip(self, body), fields(url = %url))]
    pub async fn post_json<T>(&self, url: &str, body: &T) -> Result<Response, TransferError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let request = self.authorize(self.client.post(url)).json(body);
        self.send(url, request).await
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, TransferError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransferError::network(url, e))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "response received");
            return Ok(response);
        }

        let status_code = status.as_u16();
        if matches!(status_code, 401 | 403 | 407) {
            return Err(TransferError::auth_required(url, status_code));
        }
        Err(TransferError::http_status(url, status_code))
    }
}

/// Default User-Agent identifying the tool.
fn default_user_agent() -> String {
    format!("transferq/{}", env!("CARGO_PKG_VERSION"))
}

/// True when the server advertises byte-range support.
#[must_use]
pub fn accepts_ranges(headers: &HeaderMap) -> bool {
    if headers.contains_key(CONTENT_RANGE) {
        return true;
    }
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("none"))
}

/// Parses the complete length from `Content-Range: bytes a-b/total`.
#[must_use]
pub fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit_once('/'))
        .and_then(|(_, total)| total.trim().parse::<u64>().ok())
}

/// Total object size implied by a response that starts at `offset`.
///
/// Prefers `Content-Range`; otherwise a 206 adds `Content-Length` to the
/// offset and a 200 uses `Content-Length` as-is.
#[must_use]
pub fn derive_total_length(status: StatusCode, headers: &HeaderMap, offset: u64) -> Option<u64> {
    if let Some(total) = content_range_total(headers) {
        return Some(total);
    }
    let current = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if status == StatusCode::PARTIAL_CONTENT {
        current.map(|remaining| offset.saturating_add(remaining))
    } else {
        current
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(reqwest::header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_accepts_ranges_variants() {
        assert!(accepts_ranges(&headers(&[(ACCEPT_RANGES, "bytes")])));
        assert!(accepts_ranges(&headers(&[(CONTENT_RANGE, "bytes 0-9/10")])));
        assert!(!accepts_ranges(&headers(&[(ACCEPT_RANGES, "none")])));
        assert!(!accepts_ranges(&HeaderMap::new()));
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(
            content_range_total(&headers(&[(CONTENT_RANGE, "bytes 100-199/1000")])),
            Some(1000)
        );
        assert_eq!(
            content_range_total(&headers(&[(CONTENT_RANGE, "bytes 100-199/*")])),
            None
        );
    }

    #[test]
    fn test_derive_total_length_partial_adds_offset() {
        let map = headers(&[(CONTENT_LENGTH, "600")]);
        assert_eq!(
            derive_total_length(StatusCode::PARTIAL_CONTENT, &map, 400),
            Some(1000)
        );
        assert_eq!(derive_total_length(StatusCode::OK, &map, 400), Some(600));
    }

    #[test]
    fn test_derive_total_length_prefers_content_range() {
        let map = headers(&[(CONTENT_LENGTH, "600"), (CONTENT_RANGE, "bytes 400-999/1000")]);
        assert_eq!(
            derive_total_length(StatusCode::PARTIAL_CONTENT, &map, 400),
            Some(1000)
        );
    }

    #[test]
    fn test_default_user_agent_names_tool() {
        assert!(default_user_agent().starts_with("transferq/"));
    }

    #[test]
    fn test_client_builds_with_defaults() {
        let client = HttpClient::new(&ClientOptions {
            auth_token: Some(String::new()),
            ..ClientOptions::default()
        })
        .unwrap();
        assert!(client.auth_token.is_none());
    }
}
