use std::collections::BTreeSet;
use std::time::Duration;

use credmgr_utils::SecretString;
use time::OffsetDateTime;

/// Access/refresh token pair plus the metadata needed to authenticate
/// requests for one identity.
///
/// `Debug` is safe to log: both tokens are [`SecretString`]s.
#[derive(Debug, Clone)]
pub struct Credential {
    identity: String,
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    expires_at: Option<OffsetDateTime>,
    scopes: BTreeSet<String>,
    user_name: Option<String>,
}

impl Credential {
    /// A credential with no refresh token, no expiry and no scopes.
    #[must_use]
    pub fn new(identity: impl Into<String>, access_token: impl Into<SecretString>) -> Self {
        Self {
            identity: identity.into(),
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scopes: BTreeSet::new(),
            user_name: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<SecretString>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn with_optional_refresh_token(mut self, refresh_token: Option<SecretString>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expire `lifetime` after `now`.
    ///
    /// A lifetime too large to represent leaves the credential without an
    /// expiry.
    #[must_use]
    pub fn with_lifetime(mut self, now: OffsetDateTime, lifetime: Duration) -> Self {
        self.expires_at = time::Duration::try_from(lifetime)
            .ok()
            .and_then(|d| now.checked_add(d));
        self
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    #[must_use]
    pub fn with_optional_user_name(mut self, user_name: Option<String>) -> Self {
        self.user_name = user_name;
        self
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
    }

    #[must_use]
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Chat servers take the access token as the connection password in the
    /// form `oauth:<token>`.
    #[must_use]
    pub fn chat_password(&self) -> SecretString {
        SecretString::new(format!("oauth:{}", self.access_token.expose()))
    }
}
