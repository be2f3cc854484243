use std::time::Duration;

use thiserror::Error;

/// Errors produced by an [`HttpTransport`](crate::HttpTransport).
///
/// Non-2xx responses are not errors at this layer.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Request could not be built
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header value (e.g. a control character in a configured value)
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Request (headers and body) did not complete in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Network or connection failure
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS setup failure
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded the configured limit
    #[error("Response body too large: limit {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// URL has no scheme or no host
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri { url: String, reason: String },

    /// URL scheme rejected by the transport security mode
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// A credential needed to authorize the request could not be obtained
    #[error("Credential unavailable: {0}")]
    Credential(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// `true` for failures worth retrying later (network, timeout).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}
