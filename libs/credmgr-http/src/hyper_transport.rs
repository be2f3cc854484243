use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, USER_AGENT};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::config::{TlsRootConfig, TransportConfig, TransportSecurity};
use crate::error::TransportError;
use crate::tls;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Pooled hyper client implementing [`HttpTransport`].
///
/// `Clone` is cheap (the connection pool is shared), so a single instance can
/// be handed to several refreshers. Also usable as a `tower::Service`, which
/// is how the bearer-auth layer in `credmgr` wraps it.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    user_agent: HeaderValue,
    request_timeout: Duration,
    max_body_size: usize,
    transport_security: TransportSecurity,
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("user_agent", &self.user_agent)
            .field("request_timeout", &self.request_timeout)
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Build a transport from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Tls`] if the TLS roots cannot be loaded and
    /// [`TransportError::InvalidHeaderValue`] if the user agent is not a valid
    /// header value.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let https = build_https_connector(config.tls_roots, config.transport)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout only takes effect with a pool timer
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(idle) = config.pool_idle_timeout {
            builder.pool_idle_timeout(idle);
        }
        let client = builder.build::<_, Full<Bytes>>(https);

        Ok(Self {
            client,
            user_agent: HeaderValue::from_str(&config.user_agent)?,
            request_timeout: config.request_timeout,
            max_body_size: config.max_body_size,
            transport_security: config.transport,
        })
    }

    fn check_uri(&self, uri: &http::Uri) -> Result<(), TransportError> {
        let Some(scheme) = uri.scheme_str() else {
            return Err(TransportError::InvalidUri {
                url: uri.to_string(),
                reason: "missing scheme".to_owned(),
            });
        };
        if uri.authority().is_none() {
            return Err(TransportError::InvalidUri {
                url: uri.to_string(),
                reason: "missing host".to_owned(),
            });
        }
        match (scheme, self.transport_security) {
            ("https", _) | ("http", TransportSecurity::AllowInsecureHttp) => Ok(()),
            ("http", _) => Err(TransportError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "TLS is required".to_owned(),
            }),
            _ => Err(TransportError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http and https are supported".to_owned(),
            }),
        }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.check_uri(request.uri())?;

        let (mut parts, body) = request.into_parts();
        parts
            .headers
            .entry(USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());
        let method = parts.method.clone();
        let uri = parts.uri.clone();

        let client = self.client.clone();
        let limit = self.max_body_size;
        let exchange = async move {
            let response = client
                .request(http::Request::from_parts(parts, Full::new(body)))
                .await?;
            let (parts, body) = response.into_parts();
            let collected = Limited::new(body, limit).collect().await.map_err(|e| {
                if e.is::<LengthLimitError>() {
                    TransportError::BodyTooLarge { limit }
                } else {
                    TransportError::Transport(e)
                }
            })?;
            Ok::<_, TransportError>(http::Response::from_parts(parts, collected.to_bytes()))
        };

        let timeout = self.request_timeout;
        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        tracing::debug!(
            method = %method,
            uri = %uri,
            status = response.status().as_u16(),
            "HTTP exchange completed"
        );
        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.execute(request).await
    }
}

impl tower::Service<HttpRequest> for HyperTransport {
    type Response = HttpResponse;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.execute(request).await })
    }
}

fn build_https_connector(
    tls_roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, TransportError> {
    let allow_http = transport == TransportSecurity::AllowInsecureHttp;

    let builder = match tls_roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::crypto_provider())
            .map_err(|e| TransportError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            let client_config =
                tls::native_roots_client_config().map_err(|e| TransportError::Tls(e.into()))?;
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(client_config)
        }
    };

    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
