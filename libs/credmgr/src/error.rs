use thiserror::Error;

/// Failure to obtain a usable credential.
///
/// `Clone` so every caller waiting on the same in-flight refresh receives the
/// same value. Messages never contain token or client-secret material.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No credential was ever stored for the identity (or it was revoked).
    #[error("no credential stored for identity '{identity}'")]
    NotAuthenticated { identity: String },

    /// The refresh token itself is no longer accepted; the user must
    /// authenticate again.
    #[error("refresh token rejected: {0}")]
    ExpiredRefreshToken(String),

    /// Transport failure, timeout or a transient endpoint status.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The token endpoint answered with something unusable.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// `true` when retrying later (with backoff) may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }

    /// `true` when only a fresh interactive authentication can recover.
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated { .. } | Self::ExpiredRefreshToken(_)
        )
    }
}

/// Invalid credential-manager configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] credmgr_http::TransportError),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn messages_render() {
        let e = AuthError::NotAuthenticated {
            identity: "u1".into(),
        };
        assert_eq!(e.to_string(), "no credential stored for identity 'u1'");
        assert_eq!(
            AuthError::NetworkFailure("timed out".into()).to_string(),
            "network failure: timed out"
        );
        assert_eq!(
            ConfigError::Invalid("client_id must not be empty".into()).to_string(),
            "invalid configuration: client_id must not be empty"
        );
    }

    #[test]
    fn classification() {
        let not_auth = AuthError::NotAuthenticated {
            identity: "u1".into(),
        };
        let expired = AuthError::ExpiredRefreshToken("invalid_grant".into());
        let network = AuthError::NetworkFailure("reset".into());
        let invalid = AuthError::InvalidResponse("missing access_token".into());

        assert!(network.is_retryable());
        assert!(!expired.is_retryable());
        assert!(!invalid.is_retryable());

        assert!(not_auth.requires_reauthentication());
        assert!(expired.requires_reauthentication());
        assert!(!network.requires_reauthentication());
        assert!(!invalid.requires_reauthentication());
    }
}
