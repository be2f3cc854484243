use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use credmgr_utils::SecretString;
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::CredentialManagerConfig;
use crate::credential::Credential;
use crate::error::{AuthError, ConfigError};
use crate::persistence::{CredentialPersistence, FileCredentialPersistence, PersistenceError};
use crate::refresher::{OAuthRefresher, TokenRefresher};
use crate::store::CredentialStore;
use crate::validator::TokenValidator;

/// Default upper bound on one refresh exchange.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

type RefreshResult = Result<Credential, AuthError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Lifecycle state of one identity, as seen by
/// [`CredentialManager::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Nothing stored.
    Absent,
    /// Stored and usable.
    Valid,
    /// Stored but past (or within the safety margin of) its expiry.
    Expiring,
    /// A refresh is in flight.
    Refreshing,
    /// The last refresh failed; see [`CredentialManager::last_error`].
    Failed,
}

impl CredentialState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Valid => "valid",
            Self::Expiring => "expiring",
            Self::Refreshing => "refreshing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    store: CredentialStore,
    in_flight: Mutex<HashMap<String, PendingRefresh>>,
    failures: Mutex<HashMap<String, AuthError>>,
    refresher: Arc<dyn TokenRefresher>,
    validator: TokenValidator,
    clock: Arc<dyn Clock>,
    refresh_timeout: Duration,
    persistence: Option<Arc<dyn CredentialPersistence>>,
    auto_save: bool,
    save_lock: tokio::sync::Mutex<()>,
}

/// Hands out valid credentials per identity, refreshing them when needed.
///
/// At most one refresh per identity is in flight at any time; concurrent
/// callers await the same result. The refresh runs on its own task, so a
/// caller that gives up (drops its future) does not abort it for the others.
///
/// Cloning is cheap and every clone shares the same store.
///
/// Refreshes are spawned with [`tokio::spawn`], so the async methods must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("identities", &self.inner.store.len())
            .field("in_flight", &self.inner.in_flight.lock().len())
            .field("validator", &self.inner.validator)
            .field("refresh_timeout", &self.inner.refresh_timeout)
            .field("persistent", &self.inner.persistence.is_some())
            .field("auto_save", &self.inner.auto_save)
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    #[must_use]
    pub fn builder(refresher: Arc<dyn TokenRefresher>) -> CredentialManagerBuilder {
        CredentialManagerBuilder::new(refresher)
    }

    /// Build a manager backed by an [`OAuthRefresher`] and, when configured,
    /// a [`FileCredentialPersistence`].
    ///
    /// The store starts empty; call [`load`](Self::load) to read persisted
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP
    /// transport cannot be built.
    pub fn from_config(config: &CredentialManagerConfig) -> Result<Self, ConfigError> {
        let refresher = OAuthRefresher::from_config(config)?;
        let mut builder = Self::builder(Arc::new(refresher))
            .validator(TokenValidator::new(config.safety_margin))
            .refresh_timeout(config.refresh_timeout);
        if let Some(persistence) = &config.persistence {
            builder = builder
                .persistence(Arc::new(FileCredentialPersistence::new(&persistence.path)))
                .auto_save(persistence.auto_save);
        }
        Ok(builder.build())
    }

    /// Return a valid credential for `identity`, refreshing it first if it is
    /// expired or about to expire.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if nothing is stored for `identity`
    ///   (or it is revoked while the refresh is in flight)
    /// - any refresh error, unchanged; the stored credential is left as is
    pub async fn acquire(&self, identity: &str) -> Result<Credential, AuthError> {
        let Some(current) = self.inner.store.get(identity) else {
            return Err(AuthError::NotAuthenticated {
                identity: identity.to_owned(),
            });
        };
        if self.inner.validator.is_valid(&current, self.inner.clock.now()) {
            return Ok(current);
        }

        tracing::debug!(identity, "credential stale, joining refresh");
        Inner::join_or_start(&self.inner, identity, false).await
    }

    /// Refresh `identity` even if its credential is still valid. Joins a
    /// refresh that is already in flight instead of starting a second one.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn force_refresh(&self, identity: &str) -> Result<Credential, AuthError> {
        if !self.inner.store.contains(identity) {
            return Err(AuthError::NotAuthenticated {
                identity: identity.to_owned(),
            });
        }
        Inner::join_or_start(&self.inner, identity, true).await
    }

    /// Add or replace a credential obtained elsewhere (for example an
    /// authorization-code login). Clears any recorded failure.
    pub async fn register(&self, credential: Credential) {
        let identity = credential.identity().to_owned();
        self.inner.store.put(credential);
        self.inner.failures.lock().remove(&identity);
        tracing::info!(identity = %identity, "credential registered");
        self.inner.autosave().await;
    }

    /// Mark the stored credential as expired so the next
    /// [`acquire`](Self::acquire) refreshes it. Returns `false` if nothing is
    /// stored.
    #[must_use]
    pub fn invalidate(&self, identity: &str) -> bool {
        let now = self.inner.clock.now();
        self.inner
            .store
            .modify(identity, |current| Some(current.clone().with_expires_at(now)))
    }

    /// Like [`invalidate`](Self::invalidate), but only while `access_token`
    /// is still the stored token. A credential refreshed in the meantime is
    /// left alone.
    #[must_use]
    pub fn invalidate_token(&self, identity: &str, access_token: &str) -> bool {
        let now = self.inner.clock.now();
        self.inner.store.modify(identity, |current| {
            (current.access_token().expose() == access_token)
                .then(|| current.clone().with_expires_at(now))
        })
    }

    /// Forget `identity` locally, then ask the authorization server to revoke
    /// its tokens. Remote failures are logged, not returned. Returns `false`
    /// if nothing was stored.
    ///
    /// A refresh in flight for `identity` completes with
    /// [`AuthError::NotAuthenticated`] and does not restore the credential.
    pub async fn revoke(&self, identity: &str) -> bool {
        let Some(removed) = self.inner.store.remove(identity) else {
            return false;
        };
        self.inner.failures.lock().remove(identity);
        tracing::info!(identity, "credential revoked");
        self.inner.autosave().await;

        let timeout = self.inner.refresh_timeout;
        match tokio::time::timeout(timeout, self.inner.refresher.revoke(&removed)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(identity, error = %e, "remote revocation failed");
            }
            Err(_) => {
                tracing::warn!(identity, ?timeout, "remote revocation timed out");
            }
        }
        true
    }

    /// Replace the store contents with the persisted credentials. Returns how
    /// many were loaded; `0` without persistence.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the persisted data cannot be read.
    pub async fn load(&self) -> Result<usize, PersistenceError> {
        let Some(persistence) = &self.inner.persistence else {
            return Ok(0);
        };
        let credentials = persistence.load().await?;
        let count = credentials.len();
        self.inner.store.replace_all(credentials);
        self.inner.failures.lock().clear();
        tracing::info!(count, "credentials loaded");
        Ok(count)
    }

    /// Persist the current store. A no-op without persistence.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the data cannot be written.
    pub async fn save(&self) -> Result<(), PersistenceError> {
        self.inner.save().await
    }

    /// Sorted list of stored identities.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        self.inner.store.identities()
    }

    /// The stored credential, without validity checks or refresh.
    #[must_use]
    pub fn peek(&self, identity: &str) -> Option<Credential> {
        self.inner.store.get(identity)
    }

    /// Time left before `credential` stops being valid; `None` if it never
    /// expires.
    #[must_use]
    pub fn remaining(&self, credential: &Credential) -> Option<Duration> {
        self.inner
            .validator
            .remaining(credential, self.inner.clock.now())
    }

    #[must_use]
    pub fn state(&self, identity: &str) -> CredentialState {
        let Some(current) = self.inner.store.get(identity) else {
            return CredentialState::Absent;
        };
        if self.inner.in_flight.lock().contains_key(identity) {
            return CredentialState::Refreshing;
        }
        if self.inner.failures.lock().contains_key(identity) {
            return CredentialState::Failed;
        }
        if self.inner.validator.is_valid(&current, self.inner.clock.now()) {
            CredentialState::Valid
        } else {
            CredentialState::Expiring
        }
    }

    /// The error of the last failed refresh, until a refresh succeeds or the
    /// credential is registered again.
    #[must_use]
    pub fn last_error(&self, identity: &str) -> Option<AuthError> {
        self.inner.failures.lock().get(identity).cloned()
    }
}

impl Inner {
    fn join_or_start(this: &Arc<Self>, identity: &str, force: bool) -> PendingRefresh {
        let mut in_flight = this.in_flight.lock();
        if let Some(pending) = in_flight.get(identity) {
            return pending.clone();
        }

        let task = tokio::spawn(Self::run_refresh(Arc::clone(this), identity.to_owned(), force));
        let pending = async move {
            task.await.unwrap_or_else(|e| {
                Err(AuthError::NetworkFailure(format!("refresh task failed: {e}")))
            })
        }
        .boxed()
        .shared();
        in_flight.insert(identity.to_owned(), pending.clone());
        pending
    }

    async fn run_refresh(self: Arc<Self>, identity: String, force: bool) -> RefreshResult {
        let slot = InFlightSlot {
            in_flight: &self.in_flight,
            identity: &identity,
        };
        let outcome = self.refresh_once(&identity, force).await;
        match &outcome {
            Ok(_) => {
                self.failures.lock().remove(&identity);
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "credential refresh failed");
                if self.store.contains(&identity) {
                    self.failures.lock().insert(identity.clone(), e.clone());
                }
            }
        }
        drop(slot);

        if outcome.is_ok() {
            self.autosave().await;
        }
        outcome
    }

    async fn refresh_once(&self, identity: &str, force: bool) -> RefreshResult {
        let Some(current) = self.store.get(identity) else {
            return Err(AuthError::NotAuthenticated {
                identity: identity.to_owned(),
            });
        };
        // Another caller may have refreshed between our check and this task.
        if !force && self.validator.is_valid(&current, self.clock.now()) {
            return Ok(current);
        }

        tracing::info!(identity, "refreshing credential");
        let fresh =
            match tokio::time::timeout(self.refresh_timeout, self.refresher.refresh(&current)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(AuthError::NetworkFailure(format!(
                        "refresh timed out after {} ms",
                        self.refresh_timeout.as_millis()
                    )));
                }
            };

        if fresh.identity() != identity {
            return Err(AuthError::InvalidResponse(format!(
                "refresher returned a credential for '{}'",
                fresh.identity()
            )));
        }
        if !self
            .store
            .replace_if(fresh.clone(), |stored| same_tokens(stored, &current))
        {
            let Some(newer) = self.store.get(identity) else {
                tracing::warn!(identity, "credential revoked during refresh, discarding result");
                return Err(AuthError::NotAuthenticated {
                    identity: identity.to_owned(),
                });
            };
            tracing::info!(identity, "credential replaced during refresh, discarding result");
            return Ok(newer);
        }
        tracing::info!(
            identity,
            expires_at = ?fresh.expires_at(),
            "credential refreshed"
        );
        Ok(fresh)
    }

    async fn save(&self) -> Result<(), PersistenceError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        // Snapshot under the lock so saves land in the order they were taken.
        let _guard = self.save_lock.lock().await;
        persistence.save(&self.store.snapshot()).await
    }

    async fn autosave(&self) {
        if !self.auto_save {
            return;
        }
        if let Err(e) = self.save().await {
            tracing::warn!(error = %e, "failed to save credentials");
        }
    }
}

/// Frees the in-flight entry of one identity when dropped, so a refresh that
/// panics or is aborted does not block later attempts.
struct InFlightSlot<'a> {
    in_flight: &'a Mutex<HashMap<String, PendingRefresh>>,
    identity: &'a str,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.identity);
    }
}

/// Whether `a` and `b` carry the same access and refresh token.
fn same_tokens(a: &Credential, b: &Credential) -> bool {
    a.access_token().expose() == b.access_token().expose()
        && a.refresh_token().map(SecretString::expose)
            == b.refresh_token().map(SecretString::expose)
}

/// Builder for [`CredentialManager`].
pub struct CredentialManagerBuilder {
    refresher: Arc<dyn TokenRefresher>,
    validator: TokenValidator,
    clock: Arc<dyn Clock>,
    refresh_timeout: Duration,
    persistence: Option<Arc<dyn CredentialPersistence>>,
    auto_save: bool,
}

impl CredentialManagerBuilder {
    fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            refresher,
            validator: TokenValidator::default(),
            clock: Arc::new(SystemClock),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            persistence: None,
            auto_save: true,
        }
    }

    #[must_use]
    pub fn validator(mut self, validator: TokenValidator) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn safety_margin(self, margin: Duration) -> Self {
        self.validator(TokenValidator::new(margin))
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    #[must_use]
    pub fn persistence(mut self, persistence: Arc<dyn CredentialPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Save after every register, successful refresh and revoke (default:
    /// on). Has no effect without persistence.
    #[must_use]
    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> CredentialManager {
        CredentialManager {
            inner: Arc::new(Inner {
                store: CredentialStore::new(),
                in_flight: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                refresher: self.refresher,
                validator: self.validator,
                clock: self.clock,
                refresh_timeout: self.refresh_timeout,
                persistence: self.persistence,
                auto_save: self.auto_save,
                save_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use time::macros::datetime;

    const START: time::OffsetDateTime = datetime!(2026-07-01 12:00 UTC);

    /// Refresher that issues `a2`, `a3`, ... after an adjustable delay, or
    /// fails with a fixed error.
    struct FakeRefresher {
        clock: Arc<ManualClock>,
        calls: AtomicUsize,
        revokes: AtomicUsize,
        delay_ms: AtomicU64,
        fail_with: parking_lot::Mutex<Option<AuthError>>,
    }

    impl FakeRefresher {
        fn new(clock: Arc<ManualClock>) -> Arc<Self> {
            Arc::new(Self {
                clock,
                calls: AtomicUsize::new(0),
                revokes: AtomicUsize::new(0),
                delay_ms: AtomicU64::new(0),
                fail_with: parking_lot::Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_delay(&self, delay: Duration) {
            self.delay_ms
                .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
        }

        fn fail_with(&self, err: AuthError) {
            *self.fail_with.lock() = Some(err);
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if let Some(err) = self.fail_with.lock().clone() {
                return Err(err);
            }
            Ok(Credential::new(credential.identity(), format!("a{}", n + 1))
                .with_refresh_token(format!("r{}", n + 1))
                .with_lifetime(self.clock.now(), Duration::from_secs(3600)))
        }

        async fn revoke(&self, _credential: &Credential) -> Result<(), AuthError> {
            self.revokes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        refresher: Arc<FakeRefresher>,
        manager: CredentialManager,
    }

    fn fixture() -> Fixture {
        fixture_with(|b| b)
    }

    fn fixture_with(
        configure: impl FnOnce(CredentialManagerBuilder) -> CredentialManagerBuilder,
    ) -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let refresher = FakeRefresher::new(Arc::clone(&clock));
        let builder = CredentialManager::builder(refresher.clone())
            .clock(clock.clone())
            .refresh_timeout(Duration::from_secs(2));
        Fixture {
            clock,
            refresher,
            manager: configure(builder).build(),
        }
    }

    fn expires_in(secs: i64) -> Credential {
        Credential::new("u1", "a1")
            .with_refresh_token("r1")
            .with_expires_at(START + time::Duration::seconds(secs))
    }

    #[tokio::test]
    async fn absent_identity_is_not_authenticated() {
        let f = fixture();
        let err = f.manager.acquire("nobody").await.unwrap_err();
        assert_eq!(
            err,
            AuthError::NotAuthenticated {
                identity: "nobody".into()
            }
        );
        assert_eq!(f.refresher.calls(), 0);
    }

    #[tokio::test]
    async fn valid_credential_skips_refresh() {
        let f = fixture();
        f.manager.register(expires_in(3600)).await;

        let c = f.manager.acquire("u1").await.unwrap();
        assert_eq!(c.access_token().expose(), "a1");
        assert_eq!(f.refresher.calls(), 0);
    }

    #[tokio::test]
    async fn expired_credential_is_refreshed_and_stored() {
        let f = fixture();
        f.manager.register(expires_in(-10)).await;

        let c = f.manager.acquire("u1").await.unwrap();
        assert_eq!(c.access_token().expose(), "a2");
        assert_eq!(
            c.expires_at(),
            Some(START + time::Duration::seconds(3600))
        );
        assert_eq!(f.refresher.calls(), 1);

        // stored: the next acquire is served without another refresh
        let again = f.manager.acquire("u1").await.unwrap();
        assert_eq!(again.access_token().expose(), "a2");
        assert_eq!(f.refresher.calls(), 1);
        assert_eq!(f.manager.state("u1"), CredentialState::Valid);
    }

    #[tokio::test]
    async fn credential_inside_safety_margin_is_refreshed() {
        let f = fixture();
        f.manager.register(expires_in(20)).await;
        let c = f.manager.acquire("u1").await.unwrap();
        assert_eq!(c.access_token().expose(), "a2");
    }

    #[tokio::test]
    async fn concurrent_acquires_share_one_refresh() {
        let f = fixture();
        f.refresher.set_delay(Duration::from_millis(100));
        f.manager.register(expires_in(-10)).await;

        let results = futures::future::join_all((0..16).map(|_| {
            let manager = f.manager.clone();
            async move { manager.acquire("u1").await }
        }))
        .await;

        assert_eq!(f.refresher.calls(), 1);
        for r in results {
            assert_eq!(r.unwrap().access_token().expose(), "a2");
        }
    }

    #[tokio::test]
    async fn concurrent_acquires_across_tasks_share_one_refresh() {
        let f = fixture();
        f.refresher.set_delay(Duration::from_millis(100));
        f.manager.register(expires_in(-10)).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = f.manager.clone();
                tokio::spawn(async move { manager.acquire("u1").await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().access_token().expose(), "a2");
        }
        assert_eq!(f.refresher.calls(), 1);
    }

    #[tokio::test]
    async fn identities_refresh_independently() {
        let f = fixture();
        f.refresher.set_delay(Duration::from_millis(50));
        f.manager.register(expires_in(-10)).await;
        f.manager
            .register(
                Credential::new("u2", "b1")
                    .with_refresh_token("rb")
                    .with_expires_at(START),
            )
            .await;

        let (one, two) = tokio::join!(f.manager.acquire("u1"), f.manager.acquire("u2"));
        assert_eq!(one.unwrap().identity(), "u1");
        assert_eq!(two.unwrap().identity(), "u2");
        assert_eq!(f.refresher.calls(), 2);
    }

    #[tokio::test]
    async fn rejected_refresh_token_reaches_every_waiter_and_keeps_store() {
        let f = fixture();
        f.refresher.set_delay(Duration::from_millis(50));
        f.refresher
            .fail_with(AuthError::ExpiredRefreshToken("invalid_grant".into()));
        f.manager.register(expires_in(-10)).await;

        let results = futures::future::join_all((0..4).map(|_| f.manager.acquire("u1"))).await;
        for r in results {
            assert_eq!(
                r.unwrap_err(),
                AuthError::ExpiredRefreshToken("invalid_grant".into())
            );
        }
        assert_eq!(f.refresher.calls(), 1);

        let stored = f.manager.peek("u1").unwrap();
        assert_eq!(stored.access_token().expose(), "a1");
        assert_eq!(stored.refresh_token().unwrap().expose(), "r1");
        assert_eq!(f.manager.state("u1"), CredentialState::Failed);
        assert!(f.manager.last_error("u1").unwrap().requires_reauthentication());
    }

    #[tokio::test]
    async fn failed_refresh_is_retried_on_next_acquire() {
        let f = fixture();
        f.refresher
            .fail_with(AuthError::NetworkFailure("connection reset".into()));
        f.manager.register(expires_in(-10)).await;
        assert!(f.manager.acquire("u1").await.unwrap_err().is_retryable());

        *f.refresher.fail_with.lock() = None;
        let c = f.manager.acquire("u1").await.unwrap();
        assert_eq!(c.access_token().expose(), "a3");
        assert_eq!(f.refresher.calls(), 2);
        assert_eq!(f.manager.state("u1"), CredentialState::Valid);
        assert!(f.manager.last_error("u1").is_none());
    }

    #[tokio::test]
    async fn timeout_fails_with_network_failure_and_frees_slot() {
        let f = fixture_with(|b| b.refresh_timeout(Duration::from_millis(50)));
        f.refresher.set_delay(Duration::from_millis(500));
        f.manager.register(expires_in(-10)).await;

        let err = f.manager.acquire("u1").await.unwrap_err();
        assert!(matches!(err, AuthError::NetworkFailure(ref m) if m.contains("timed out")));
        assert_ne!(f.manager.state("u1"), CredentialState::Refreshing);

        f.refresher.set_delay(Duration::ZERO);
        let c = f.manager.acquire("u1").await.unwrap();
        assert_eq!(c.access_token().expose(), "a3");
        assert_eq!(f.refresher.calls(), 2);
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_cancel_refresh() {
        let f = fixture();
        f.refresher.set_delay(Duration::from_millis(100));
        f.manager.register(expires_in(-10)).await;

        let gave_up =
            tokio::time::timeout(Duration::from_millis(10), f.manager.acquire("u1")).await;
        assert!(gave_up.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.manager.peek("u1").unwrap().access_token().expose(), "a2");
        assert_eq!(f.refresher.calls(), 1);
        assert_eq!(f.manager.state("u1"), CredentialState::Valid);
    }

    #[tokio::test]
    async fn revoke_during_refresh_is_not_undone() {
        let f = fixture();
        f.refresher.set_delay(Duration::from_millis(100));
        f.manager.register(expires_in(-10)).await;

        let manager = f.manager.clone();
        let pending = tokio::spawn(async move { manager.acquire("u1").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.manager.state("u1"), CredentialState::Refreshing);

        assert!(f.manager.revoke("u1").await);
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated { .. }));
        assert!(f.manager.peek("u1").is_none());
        assert_eq!(f.manager.state("u1"), CredentialState::Absent);
    }

    #[tokio::test]
    async fn register_during_refresh_wins() {
        let f = fixture();
        f.refresher.set_delay(Duration::from_millis(100));
        f.manager.register(expires_in(-10)).await;

        let manager = f.manager.clone();
        let pending = tokio::spawn(async move { manager.acquire("u1").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.manager
            .register(
                Credential::new("u1", "new-login")
                    .with_refresh_token("r-new")
                    .with_expires_at(START + time::Duration::hours(4)),
            )
            .await;

        let c = pending.await.unwrap().unwrap();
        assert_eq!(c.access_token().expose(), "new-login");
        let stored = f.manager.peek("u1").unwrap();
        assert_eq!(stored.access_token().expose(), "new-login");
        assert_eq!(stored.refresh_token().unwrap().expose(), "r-new");
        assert_eq!(f.refresher.calls(), 1);
        assert_eq!(f.manager.state("u1"), CredentialState::Valid);
    }

    #[tokio::test]
    async fn invalidate_during_refresh_keeps_result() {
        let f = fixture();
        f.refresher.set_delay(Duration::from_millis(100));
        f.manager.register(expires_in(-10)).await;

        let manager = f.manager.clone();
        let pending = tokio::spawn(async move { manager.acquire("u1").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.manager.invalidate("u1"));

        assert_eq!(pending.await.unwrap().unwrap().access_token().expose(), "a2");
        assert_eq!(f.manager.peek("u1").unwrap().access_token().expose(), "a2");
    }

    /// Panics on its first refresh, then issues `fresh`.
    struct PanicsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for PanicsOnce {
        async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
            let previous = self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(previous > 0, "refresher crashed");
            Ok(Credential::new(credential.identity(), "fresh"))
        }
    }

    #[tokio::test]
    async fn panicking_refresher_frees_slot_for_next_attempt() {
        let refresher = Arc::new(PanicsOnce {
            calls: AtomicUsize::new(0),
        });
        let manager = CredentialManager::builder(refresher.clone()).build();
        manager
            .register(
                Credential::new("u1", "a1")
                    .with_refresh_token("r1")
                    .with_expires_at(time::OffsetDateTime::UNIX_EPOCH),
            )
            .await;

        let err = manager.acquire("u1").await.unwrap_err();
        assert!(
            matches!(err, AuthError::NetworkFailure(ref m) if m.contains("refresh task failed")),
            "got: {err}"
        );
        assert_ne!(manager.state("u1"), CredentialState::Refreshing);

        let c = manager.acquire("u1").await.unwrap();
        assert_eq!(c.access_token().expose(), "fresh");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.state("u1"), CredentialState::Valid);
    }

    #[tokio::test]
    async fn revoke_forgets_and_calls_remote() {
        let f = fixture();
        f.manager.register(expires_in(3600)).await;

        assert!(f.manager.revoke("u1").await);
        assert!(!f.manager.revoke("u1").await);
        assert_eq!(f.refresher.revokes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            f.manager.acquire("u1").await,
            Err(AuthError::NotAuthenticated { .. })
        ));
    }

    #[tokio::test]
    async fn force_refresh_ignores_validity() {
        let f = fixture();
        f.manager.register(expires_in(3600)).await;

        let c = f.manager.force_refresh("u1").await.unwrap();
        assert_eq!(c.access_token().expose(), "a2");
        assert_eq!(f.refresher.calls(), 1);
        assert!(matches!(
            f.manager.force_refresh("nobody").await,
            Err(AuthError::NotAuthenticated { .. })
        ));
    }

    #[tokio::test]
    async fn invalidate_triggers_refresh() {
        let f = fixture();
        f.manager.register(expires_in(3600)).await;
        assert!(f.manager.invalidate("u1"));
        assert!(!f.manager.invalidate("nobody"));
        assert_eq!(f.manager.state("u1"), CredentialState::Expiring);

        let c = f.manager.acquire("u1").await.unwrap();
        assert_eq!(c.access_token().expose(), "a2");
    }

    #[tokio::test]
    async fn invalidate_token_ignores_replaced_token() {
        let f = fixture();
        f.manager.register(expires_in(3600)).await;

        assert!(!f.manager.invalidate_token("u1", "old-token"));
        assert_eq!(f.manager.state("u1"), CredentialState::Valid);
        assert!(f.manager.invalidate_token("u1", "a1"));
        assert_eq!(f.manager.state("u1"), CredentialState::Expiring);
    }

    #[tokio::test]
    async fn state_follows_clock() {
        let f = fixture();
        assert_eq!(f.manager.state("u1"), CredentialState::Absent);

        f.manager.register(expires_in(120)).await;
        assert_eq!(f.manager.state("u1"), CredentialState::Valid);
        assert_eq!(
            f.manager.remaining(&f.manager.peek("u1").unwrap()),
            Some(Duration::from_secs(90))
        );

        f.clock.advance(Duration::from_secs(100));
        assert_eq!(f.manager.state("u1"), CredentialState::Expiring);
    }

    #[tokio::test]
    async fn register_clears_failure() {
        let f = fixture();
        f.refresher
            .fail_with(AuthError::ExpiredRefreshToken("invalid_grant".into()));
        f.manager.register(expires_in(-10)).await;
        f.manager.acquire("u1").await.unwrap_err();
        assert_eq!(f.manager.state("u1"), CredentialState::Failed);

        f.manager.register(expires_in(3600)).await;
        assert_eq!(f.manager.state("u1"), CredentialState::Valid);
    }

    #[tokio::test]
    async fn auto_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let persistence: Arc<dyn CredentialPersistence> =
            Arc::new(FileCredentialPersistence::new(&path));

        let f = fixture_with(|b| b.persistence(Arc::clone(&persistence)));
        f.manager.register(expires_in(-10)).await;
        f.manager.acquire("u1").await.unwrap();

        let reopened = fixture_with(|b| b.persistence(Arc::clone(&persistence)));
        assert_eq!(reopened.manager.load().await.unwrap(), 1);
        let c = reopened.manager.peek("u1").unwrap();
        assert_eq!(c.access_token().expose(), "a2");
        assert_eq!(c.refresh_token().unwrap().expose(), "r2");
    }

    #[tokio::test]
    async fn auto_save_off_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let f = fixture_with(|b| {
            b.persistence(Arc::new(FileCredentialPersistence::new(&path)))
                .auto_save(false)
        });
        f.manager.register(expires_in(3600)).await;
        assert!(!path.exists());

        f.manager.save().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn load_without_persistence_is_noop() {
        let f = fixture();
        assert_eq!(f.manager.load().await.unwrap(), 0);
        f.manager.save().await.unwrap();
    }

    #[test]
    fn state_names() {
        assert_eq!(CredentialState::Refreshing.to_string(), "refreshing");
        assert_eq!(CredentialState::Failed.as_str(), "failed");
    }
}
