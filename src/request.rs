use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Final status of a transfer, as reported by the engine.
///
/// Propagated verbatim into the request via [`Request::set_status`]; the
/// completion callback decides what to do with failures. The core never
/// retries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Not yet completed.
    Pending,
    /// The transfer finished and a response was received.
    Success,
    /// The engine gave up waiting on the peer.
    Timeout,
    /// The connection could not be established.
    ConnectError,
    /// Host name resolution failed.
    DnsError,
    /// The TLS handshake failed.
    TlsError,
    /// The transfer was torn down before it finished.
    Aborted,
    /// Any other engine-reported failure.
    Error,
}

impl TransferStatus {
    /// True for the one non-failure terminal state.
    pub fn is_success(self) -> bool {
        matches!(self, TransferStatus::Success)
    }
}

/// Errors from [`Request::prepare_for_perform`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrepareError {
    /// The request URL is empty.
    #[error("empty url")]
    EmptyUrl,
    /// The URL scheme is not http or https.
    #[error("unsupported scheme in url: {0}")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("url has no host: {0}")]
    MissingHost(String),
}

/// A single HTTP request travelling through the event loop.
///
/// The caller builds one, hands it to `submit`, and receives it back (moved)
/// in the completion callback with its status filled in. While in flight the
/// request is owned by the loop; the caller never aliases it.
#[derive(Debug)]
pub struct Request {
    url: String,
    body: Bytes,
    timeout: Option<Duration>,
    status: TransferStatus,
}

impl Request {
    /// Create a request for the given URL with no body.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: Bytes::new(),
            timeout: None,
            status: TransferStatus::Pending,
        }
    }

    /// Attach a body to upload.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a per-request timeout hint for the engine.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Status reported by the engine, or `Pending` before completion.
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Caller-thread setup run by `submit` before the request enters the
    /// queue, so no blocking work lands on the loop thread. Must not perform
    /// I/O. Currently validates the URL shape.
    pub fn prepare_for_perform(&mut self) -> Result<(), PrepareError> {
        if self.url.is_empty() {
            return Err(PrepareError::EmptyUrl);
        }
        let rest = self
            .url
            .strip_prefix("http://")
            .or_else(|| self.url.strip_prefix("https://"))
            .ok_or_else(|| PrepareError::UnsupportedScheme(self.url.clone()))?;
        let host = rest.split('/').next().unwrap_or("");
        if host.is_empty() {
            return Err(PrepareError::MissingHost(self.url.clone()));
        }
        Ok(())
    }

    /// Record the engine's verdict. Called once per request by the
    /// completion dispatcher, just before the user callback runs.
    pub fn set_status(&mut self, status: TransferStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_accepts_http_and_https() {
        assert!(Request::new("http://example.com/a").prepare_for_perform().is_ok());
        assert!(Request::new("https://example.com").prepare_for_perform().is_ok());
    }

    #[test]
    fn prepare_rejects_bad_urls() {
        assert_eq!(
            Request::new("").prepare_for_perform(),
            Err(PrepareError::EmptyUrl)
        );
        assert!(matches!(
            Request::new("ftp://example.com").prepare_for_perform(),
            Err(PrepareError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            Request::new("http:///path").prepare_for_perform(),
            Err(PrepareError::MissingHost(_))
        ));
    }

    #[test]
    fn status_starts_pending() {
        let mut request = Request::new("http://test/ok");
        assert_eq!(request.status(), TransferStatus::Pending);
        assert!(!request.status().is_success());
        request.set_status(TransferStatus::Success);
        assert!(request.status().is_success());
    }
}
