use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// Fully buffered outbound request.
pub type HttpRequest = http::Request<Bytes>;

/// Fully buffered response (any status).
pub type HttpResponse = http::Response<Bytes>;

/// Minimal HTTP capability needed by token exchanges.
///
/// Implementations return `Ok` for every HTTP status and reserve `Err` for
/// transport-level failures.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` and buffer the whole response body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on connection, TLS, timeout or body-limit
    /// failures.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T> HttpTransport for Arc<T>
where
    T: HttpTransport + ?Sized,
{
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}
