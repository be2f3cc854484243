use std::path::PathBuf;
use std::time::Duration;

use credmgr_http::{TransportConfig, TransportSecurity};
use credmgr_utils::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::validator::DEFAULT_SAFETY_MARGIN;

/// How client credentials are sent to the token endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ClientAuthMethod {
    /// `client_id` and `client_secret` as form fields. Public clients omit
    /// the secret.
    #[default]
    Form,
    /// `Authorization: Basic base64(client_id:client_secret)` (RFC 6749 §2.3.1).
    Basic,
}

/// Where credentials are saved between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    pub path: PathBuf,

    /// Save after every successful refresh, register and revoke.
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,
}

const fn default_auto_save() -> bool {
    true
}

/// Everything needed to build a
/// [`CredentialManager`](crate::CredentialManager) with
/// [`CredentialManager::from_config`](crate::CredentialManager::from_config).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialManagerConfig {
    pub token_endpoint: Option<Url>,

    /// RFC 7009 endpoint. Without it `revoke` only forgets locally.
    pub revocation_endpoint: Option<Url>,

    pub client_id: String,

    /// Redacted when the config is serialized or debug-printed.
    pub client_secret: Option<SecretString>,

    pub auth_method: ClientAuthMethod,

    #[serde(with = "credmgr_utils::duration_serde")]
    pub safety_margin: Duration,

    /// Upper bound on one refresh exchange. Exceeding it fails waiters with
    /// a network failure and frees the identity for a new attempt.
    #[serde(with = "credmgr_utils::duration_serde")]
    pub refresh_timeout: Duration,

    /// Lifetime assumed when the endpoint omits `expires_in`. `None` stores
    /// such tokens without an expiry.
    #[serde(with = "credmgr_utils::duration_serde::option")]
    pub default_ttl: Option<Duration>,

    /// Use the `client_credentials` grant for credentials that carry no
    /// refresh token (app access tokens).
    pub client_credentials_fallback: bool,

    pub persistence: Option<PersistenceConfig>,

    pub http: TransportConfig,
}

impl Default for CredentialManagerConfig {
    fn default() -> Self {
        Self {
            token_endpoint: None,
            revocation_endpoint: None,
            client_id: String::new(),
            client_secret: None,
            auth_method: ClientAuthMethod::default(),
            safety_margin: DEFAULT_SAFETY_MARGIN,
            refresh_timeout: Duration::from_secs(10),
            default_ttl: None,
            client_credentials_fallback: false,
            persistence: None,
            http: TransportConfig::default(),
        }
    }
}

impl CredentialManagerConfig {
    /// Check that the configuration is self-consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if:
    /// - `token_endpoint` is missing,
    /// - `client_id` is blank,
    /// - a client secret is needed (Basic auth or the client-credentials
    ///   fallback) but missing,
    /// - `refresh_timeout` is zero,
    /// - an endpoint uses plain `http` while the transport requires TLS,
    /// - the persistence path is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(token_endpoint) = &self.token_endpoint else {
            return Err(ConfigError::Invalid("token_endpoint is required".into()));
        };
        self.check_endpoint("token_endpoint", token_endpoint)?;
        if let Some(revocation) = &self.revocation_endpoint {
            self.check_endpoint("revocation_endpoint", revocation)?;
        }

        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client_id must not be empty".into()));
        }

        let has_secret = self.client_secret.as_ref().is_some_and(|s| !s.is_empty());
        if !has_secret {
            if self.auth_method == ClientAuthMethod::Basic {
                return Err(ConfigError::Invalid(
                    "client_secret is required for basic client authentication".into(),
                ));
            }
            if self.client_credentials_fallback {
                return Err(ConfigError::Invalid(
                    "client_secret is required for the client_credentials fallback".into(),
                ));
            }
        }

        if self.refresh_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "refresh_timeout must be greater than zero".into(),
            ));
        }

        if let Some(persistence) = &self.persistence
            && persistence.path.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid(
                "persistence.path must not be empty".into(),
            ));
        }

        Ok(())
    }

    fn check_endpoint(&self, name: &str, url: &Url) -> Result<(), ConfigError> {
        match url.scheme() {
            "https" => Ok(()),
            "http" if self.http.transport == TransportSecurity::AllowInsecureHttp => Ok(()),
            "http" => Err(ConfigError::Invalid(format!(
                "{name} must use https (set http.transport to allow_insecure_http for local testing)"
            ))),
            other => Err(ConfigError::Invalid(format!(
                "{name} has unsupported scheme '{other}'"
            ))),
        }
    }
}
