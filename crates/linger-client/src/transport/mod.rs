//! The single-request transport seam.
//!
//! Every client operation funnels into [`Transport::send`]. The library ships a
//! reqwest-backed [`HttpTransport`]; tests and offline tools plug in an
//! in-process implementation instead.

mod http_transport;
#[cfg(test)]
pub(crate) mod scripted;

pub use self::http_transport::HttpTransport;

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::error::Result;
use crate::options::BasicAuth;

/// A fully built HTTP request.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: Url,
    /// Request headers (content type for bodies).
    pub headers: HeaderMap,
    /// Request body, if any.
    pub body: Option<Bytes>,
    /// Timeout for the whole exchange.
    pub timeout: Duration,
    /// Whether compressed responses are acceptable.
    pub use_gzip: bool,
    /// Basic authentication to attach.
    pub auth: Option<BasicAuth>,
}

/// A received HTTP response with its body fully read.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub const fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Whether the response carries nothing: `204 No Content` or an empty body.
    #[must_use]
    pub fn is_no_content(&self) -> bool {
        self.status == StatusCode::NO_CONTENT || self.body.is_empty()
    }
}

/// Issues single HTTP requests.
///
/// Implementations never retry. Connection failures map to
/// [`Error::Network`](crate::Error::Network), expired timeouts to
/// [`Error::Timeout`](crate::Error::Timeout); any status code, including
/// non-2xx, is returned as a response.
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Sends one request and reads the whole response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Releases pooled resources. Later sends fail with
    /// [`Error::ClientClosed`](crate::Error::ClientClosed).
    fn close(&self) {}
}
