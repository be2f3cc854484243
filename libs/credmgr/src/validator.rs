use std::time::Duration;

use time::OffsetDateTime;

use crate::credential::Credential;

/// Default head-room before expiry at which a token is treated as stale.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

/// Decides whether a credential can still be used.
///
/// A token is valid when it is non-empty and either has no known expiry or
/// `now < expires_at - safety_margin`. The margin absorbs clock skew and the
/// time a request spends in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenValidator {
    safety_margin: Duration,
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN)
    }
}

impl TokenValidator {
    #[must_use]
    pub const fn new(safety_margin: Duration) -> Self {
        Self { safety_margin }
    }

    #[must_use]
    pub const fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    #[must_use]
    pub fn is_valid(&self, credential: &Credential, now: OffsetDateTime) -> bool {
        if credential.access_token().is_empty() {
            return false;
        }
        match credential.expires_at() {
            None => true,
            Some(expires_at) => self
                .stale_at(expires_at)
                .is_some_and(|stale_at| now < stale_at),
        }
    }

    /// Time left before the credential becomes stale; `None` when it never
    /// expires. Zero once stale.
    #[must_use]
    pub fn remaining(&self, credential: &Credential, now: OffsetDateTime) -> Option<Duration> {
        let expires_at = credential.expires_at()?;
        let Some(stale_at) = self.stale_at(expires_at) else {
            return Some(Duration::ZERO);
        };
        Some(Duration::try_from(stale_at - now).unwrap_or(Duration::ZERO))
    }

    // None when the margin does not fit before `expires_at`; such a token is
    // never valid.
    fn stale_at(&self, expires_at: OffsetDateTime) -> Option<OffsetDateTime> {
        let margin = time::Duration::try_from(self.safety_margin).ok()?;
        expires_at.checked_sub(margin)
    }
}
