use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use credmgr_http::TransportError;
use http::header::{AUTHORIZATION, HeaderName};
use http::{HeaderValue, Request, Response, StatusCode};
use tower::{Layer, Service};
use zeroize::Zeroizing;

use crate::manager::CredentialManager;

/// Tower layer that authenticates outbound requests as one identity.
///
/// Every request gets `Authorization: Bearer <token>` (or a custom header)
/// with a token from [`CredentialManager::acquire`], so stale tokens are
/// refreshed before use. A `401 Unauthorized` answer marks the token that was
/// sent as expired; the response itself is passed through unchanged.
#[derive(Clone, Debug)]
pub struct BearerAuthLayer {
    manager: CredentialManager,
    identity: Arc<str>,
    header_name: HeaderName,
}

impl BearerAuthLayer {
    #[must_use]
    pub fn new(manager: CredentialManager, identity: impl Into<Arc<str>>) -> Self {
        Self {
            manager,
            identity: identity.into(),
            header_name: AUTHORIZATION,
        }
    }

    /// Put the bearer token into `header_name` instead of `Authorization`.
    #[must_use]
    pub fn with_header_name(mut self, header_name: HeaderName) -> Self {
        self.header_name = header_name;
        self
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            manager: self.manager.clone(),
            identity: Arc::clone(&self.identity),
            header_name: self.header_name.clone(),
        }
    }
}

/// Service created by [`BearerAuthLayer`].
#[derive(Clone, Debug)]
pub struct BearerAuthService<S> {
    inner: S,
    manager: CredentialManager,
    identity: Arc<str>,
    header_name: HeaderName,
}

impl<S, B, ResBody> Service<Request<B>> for BearerAuthService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = TransportError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, TransportError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // Clone-swap keeps the service that was polled ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let manager = self.manager.clone();
        let identity = Arc::clone(&self.identity);
        let header_name = self.header_name.clone();

        Box::pin(async move {
            let credential = manager
                .acquire(&identity)
                .await
                .map_err(|e| TransportError::Credential(Box::new(e)))?;

            let raw = Zeroizing::new(format!("Bearer {}", credential.access_token().expose()));
            let mut value = HeaderValue::from_str(&raw)?;
            value.set_sensitive(true);
            req.headers_mut().insert(header_name, value);

            let response = inner.call(req).await?;
            if response.status() == StatusCode::UNAUTHORIZED
                && manager.invalidate_token(&identity, credential.access_token().expose())
            {
                tracing::warn!(
                    identity = &*identity,
                    "request rejected with 401, credential marked stale"
                );
            }
            Ok(response)
        })
    }
}
