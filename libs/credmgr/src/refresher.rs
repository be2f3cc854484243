use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use credmgr_http::{HttpResponse, HttpTransport, HyperTransport};
use credmgr_utils::SecretString;
use http::StatusCode;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use url::Url;
use zeroize::Zeroizing;

use crate::clock::{Clock, SystemClock};
use crate::config::{ClientAuthMethod, CredentialManagerConfig};
use crate::credential::Credential;
use crate::error::{AuthError, ConfigError};
use crate::wire::{ErrorResponse, TokenResponse};

/// Exchanges a credential for a fresh one.
///
/// Implementations perform exactly one attempt per call; retry policy belongs
/// to the caller.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain a new credential for the same identity.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ExpiredRefreshToken`] when the grant is rejected
    /// - [`AuthError::NetworkFailure`] on transport errors and transient
    ///   endpoint statuses
    /// - [`AuthError::InvalidResponse`] when the endpoint answer is unusable
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError>;

    /// Tell the authorization server to invalidate the credential's tokens.
    ///
    /// The default does nothing.
    ///
    /// # Errors
    ///
    /// Same classification as [`refresh`](Self::refresh).
    async fn revoke(&self, _credential: &Credential) -> Result<(), AuthError> {
        Ok(())
    }
}

/// [`TokenRefresher`] speaking RFC 6749 to a token endpoint.
///
/// Uses the `refresh_token` grant when the credential has a refresh token.
/// Without one, and with the client-credentials fallback enabled, it requests
/// a new app token with the credential's scopes.
pub struct OAuthRefresher {
    transport: Arc<dyn HttpTransport>,
    token_endpoint: Url,
    revocation_endpoint: Option<Url>,
    client_id: String,
    client_secret: Option<SecretString>,
    auth_method: ClientAuthMethod,
    default_ttl: Option<Duration>,
    client_credentials_fallback: bool,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for OAuthRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthRefresher")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field(
                "revocation_endpoint",
                &self.revocation_endpoint.as_ref().map(Url::as_str),
            )
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("auth_method", &self.auth_method)
            .field("default_ttl", &self.default_ttl)
            .field(
                "client_credentials_fallback",
                &self.client_credentials_fallback,
            )
            .finish_non_exhaustive()
    }
}

impl OAuthRefresher {
    /// Build a refresher that sends its requests through `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` does not validate.
    pub fn new(
        config: &CredentialManagerConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let token_endpoint = config
            .token_endpoint
            .clone()
            .ok_or_else(|| ConfigError::Invalid("token_endpoint is required".into()))?;

        Ok(Self {
            transport,
            token_endpoint,
            revocation_endpoint: config.revocation_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_method: config.auth_method,
            default_ttl: config.default_ttl,
            client_credentials_fallback: config.client_credentials_fallback,
            clock: Arc::new(SystemClock),
        })
    }

    /// Build a refresher with a [`HyperTransport`] made from `config.http`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` does not validate and
    /// [`ConfigError::Transport`] if the HTTP transport cannot be built.
    pub fn from_config(config: &CredentialManagerConfig) -> Result<Self, ConfigError> {
        let transport = HyperTransport::new(&config.http)?;
        Self::new(config, Arc::new(transport))
    }

    /// Use `clock` to compute expiry of refreshed credentials.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    fn grant_fields<'a>(
        &self,
        credential: &'a Credential,
        scope: &'a str,
    ) -> Result<Vec<(&'static str, &'a str)>, AuthError> {
        if let Some(refresh_token) = credential.refresh_token() {
            return Ok(vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose()),
            ]);
        }
        if self.client_credentials_fallback {
            let mut fields = vec![("grant_type", "client_credentials")];
            if !scope.is_empty() {
                fields.push(("scope", scope));
            }
            return Ok(fields);
        }
        Err(AuthError::ExpiredRefreshToken(format!(
            "credential for '{}' has no refresh token",
            credential.identity()
        )))
    }

    /// POST `fields` as a form, authenticating the client per `auth_method`.
    async fn post_form(
        &self,
        endpoint: &Url,
        fields: Vec<(&str, &str)>,
    ) -> Result<HttpResponse, AuthError> {
        // Temporary copies of the secret are scrubbed on drop.
        let secret_expose;
        let mut fields: Vec<(&str, &str)> = fields;
        let mut authorization = None;
        match self.auth_method {
            ClientAuthMethod::Form => {
                fields.push(("client_id", &self.client_id));
                if let Some(secret) = &self.client_secret {
                    secret_expose = Zeroizing::new(secret.expose().to_owned());
                    fields.push(("client_secret", &secret_expose));
                }
            }
            ClientAuthMethod::Basic => {
                let secret = self.client_secret.as_ref().map_or("", SecretString::expose);
                let credentials = Zeroizing::new(format!("{}:{secret}", self.client_id));
                let encoded =
                    Zeroizing::new(general_purpose::STANDARD.encode(credentials.as_bytes()));
                let header = Zeroizing::new(format!("Basic {}", &*encoded));
                let mut value = HeaderValue::from_str(&header)
                    .map_err(|e| AuthError::NetworkFailure(format!("bad client credentials: {e}")))?;
                value.set_sensitive(true);
                authorization = Some(value);
            }
        }

        let body = Zeroizing::new(
            serde_urlencoded::to_string(&fields)
                .map_err(|e| AuthError::NetworkFailure(format!("failed to encode form: {e}")))?,
        );

        let mut builder = http::Request::post(endpoint.as_str())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let request = builder
            .body(Bytes::copy_from_slice(body.as_bytes()))
            .map_err(|e| AuthError::NetworkFailure(format!("failed to build request: {e}")))?;

        self.transport
            .send(request)
            .await
            .map_err(|e| AuthError::NetworkFailure(e.to_string()))
    }

    fn build_credential(
        &self,
        previous: &Credential,
        body: &[u8],
    ) -> Result<Credential, AuthError> {
        let response: TokenResponse = serde_json::from_slice(body)
            .map_err(|e| AuthError::InvalidResponse(format!("malformed token response: {e}")))?;

        if response.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access_token".into()));
        }
        if let Some(token_type) = &response.token_type
            && !token_type.eq_ignore_ascii_case("bearer")
        {
            return Err(AuthError::InvalidResponse(format!(
                "unsupported token_type '{token_type}'"
            )));
        }

        let now = self.clock.now();
        let lifetime = response
            .expires_in
            .map(Duration::from_secs)
            .or(self.default_ttl);

        // Fields the endpoint leaves out carry over from the old credential.
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.refresh_token().cloned());
        let scopes: Vec<String> = match response.scope {
            Some(scope) => scope.into_scopes(),
            None => previous.scopes().iter().cloned().collect(),
        };

        let mut credential = Credential::new(previous.identity(), response.access_token)
            .with_optional_refresh_token(refresh_token)
            .with_scopes(scopes)
            .with_optional_user_name(previous.user_name().map(str::to_owned));
        if let Some(lifetime) = lifetime {
            credential = credential.with_lifetime(now, lifetime);
        }
        Ok(credential)
    }
}

/// Map a non-2xx token endpoint status to an [`AuthError`].
fn classify_failure(status: StatusCode, body: &[u8]) -> AuthError {
    let error = ErrorResponse::parse(body);
    let detail = error
        .summary()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown status").to_owned());
    let message = format!("HTTP {}: {detail}", status.as_u16());

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        return AuthError::NetworkFailure(message);
    }
    if (status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED)
        && error.rejects_grant()
    {
        return AuthError::ExpiredRefreshToken(message);
    }
    AuthError::InvalidResponse(message)
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let scope = credential
            .scopes()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let fields = self.grant_fields(credential, &scope)?;
        let grant = fields.first().map_or("", |(_, grant)| *grant);

        tracing::debug!(
            identity = credential.identity(),
            grant,
            endpoint = %self.token_endpoint,
            "requesting token"
        );
        let response = self.post_form(&self.token_endpoint, fields).await?;
        let status = response.status();
        if !status.is_success() {
            let err = classify_failure(status, response.body());
            tracing::debug!(
                identity = credential.identity(),
                status = status.as_u16(),
                error = %err,
                "token endpoint rejected request"
            );
            return Err(err);
        }

        self.build_credential(credential, response.body())
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), AuthError> {
        let Some(endpoint) = &self.revocation_endpoint else {
            return Ok(());
        };

        let mut tokens = vec![credential.access_token()];
        tokens.extend(credential.refresh_token());
        for token in tokens {
            let response = self
                .post_form(endpoint, vec![("token", token.expose())])
                .await?;
            let status = response.status();
            // Some providers answer 400 instead of 200 for a token that is
            // already invalid; other 400s are client or request errors.
            if status.is_success()
                || (status == StatusCode::BAD_REQUEST
                    && ErrorResponse::parse(response.body()).reports_invalid_token())
            {
                continue;
            }
            return Err(classify_failure(status, response.body()));
        }
        tracing::debug!(identity = credential.identity(), "credential revoked remotely");
        Ok(())
    }
}
