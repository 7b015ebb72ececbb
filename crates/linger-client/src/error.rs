//! Error types for Linger client operations.

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Result type alias for Linger client operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for Linger client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The client was closed before or during the operation.
    #[error("client is closed")]
    ClientClosed,

    /// A response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A message body could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// The client configuration was rejected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A channel or topic name was rejected before any request was made.
    #[error("invalid {kind} name: {name:?}")]
    InvalidName {
        /// What was being named (`channel`, `topic`, `message id`).
        kind: &'static str,
        /// The rejected name.
        name: String,
    },

    /// Connection-level failure below HTTP.
    #[error("network failure: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("server responded with {status}: {body}")]
    Server {
        /// The HTTP status code.
        status: StatusCode,
        /// The response body, lossily decoded as UTF-8.
        body: String,
    },

    /// The request did not complete within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn invalid_name(kind: &'static str, name: &str) -> Self {
        Self::InvalidName {
            kind,
            name: name.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::InvalidConfig(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
