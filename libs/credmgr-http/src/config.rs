use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default `User-Agent` sent with every token request.
pub const DEFAULT_USER_AGENT: &str = concat!("credmgr/", env!("CARGO_PKG_VERSION"));

/// TLS root certificate source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// OS native root certificate store
    Native,
}

/// Whether plain `http://` URLs are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections
    #[default]
    TlsOnly,
    /// Accept `http://` URLs. Only meant for local mock servers.
    AllowInsecureHttp,
}

/// Configuration for [`HyperTransport`](crate::HyperTransport).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Timeout for a single request, including reading the body (default: 10s).
    #[serde(with = "credmgr_utils::duration_serde")]
    pub request_timeout: Duration,

    /// `User-Agent` header value.
    pub user_agent: String,

    /// Maximum accepted response body in bytes (default: 64 KiB).
    pub max_body_size: usize,

    pub transport: TransportSecurity,

    pub tls_roots: TlsRootConfig,

    /// Idle pooled connections are closed after this long (`None` keeps them).
    #[serde(with = "credmgr_utils::duration_serde::option")]
    pub pool_idle_timeout: Option<Duration>,

    pub pool_max_idle_per_host: usize,
}

/// Defaults are sized for token endpoints: short timeout, small bodies, few
/// connections. Fields missing from a deserialized block take these values.
impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_body_size: 64 * 1024,
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 2,
        }
    }
}

impl TransportConfig {

    /// Preset for tests against local mock servers (plain HTTP allowed).
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            transport: TransportSecurity::AllowInsecureHttp,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}
