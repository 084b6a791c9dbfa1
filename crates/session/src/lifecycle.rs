//! Session lifecycle state machine
//!
//! [`SessionManager`] owns the token store, refresh coordinator and proactive
//! scheduler, and drives the session through its states: login/register
//! establish a session, restore revives one from durable storage, logout
//! tears everything down in an order that leaves no waiter pending.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::coordinator::{RefreshCoordinator, RefreshReason};
use crate::error::SessionError;
use crate::scheduler::ProactiveScheduler;
use crate::store::TokenStore;
use crate::traits::{AuthApi, CredentialVault};
use crate::types::{CredentialPair, SessionConfig, SessionState, SessionStateCell};

/// Owner of the session stack
///
/// Construct once per application process and share via `Arc`; the request
/// pipeline and UI glue hold clones.
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    scheduler: ProactiveScheduler,
    state: SessionStateCell,
}

impl SessionManager {
    /// Wire up the session stack against an auth API and a credential vault.
    #[must_use]
    pub fn new(
        api: Arc<dyn AuthApi>,
        vault: Arc<dyn CredentialVault>,
        config: &SessionConfig,
    ) -> Arc<Self> {
        let store = Arc::new(TokenStore::new(vault));
        let state: SessionStateCell =
            Arc::new(parking_lot::RwLock::new(SessionState::Unauthenticated));
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&api),
            Arc::clone(&store),
            Arc::clone(&state),
        ));
        let scheduler =
            ProactiveScheduler::new(Arc::clone(&coordinator), config.refresh_margin_seconds);

        Arc::new(Self { api, store, coordinator, scheduler, state })
    }

    /// Authenticate against an existing account and establish the session.
    ///
    /// # Errors
    /// Returns error if the server rejects the credentials or is unreachable;
    /// the session is left `Unauthenticated`.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<(), SessionError> {
        *self.state.write() = SessionState::Authenticating;
        info!(identifier, "logging in");

        match self.api.login(identifier, secret).await {
            Ok(pair) => {
                self.establish(pair).await;
                Ok(())
            }
            Err(err) => {
                warn!(identifier, error = %err, "login failed");
                *self.state.write() = SessionState::Unauthenticated;
                Err(err.into())
            }
        }
    }

    /// Create an account and establish a session from its first credentials.
    ///
    /// # Errors
    /// Returns error if registration is rejected or the server is
    /// unreachable; the session is left `Unauthenticated`.
    pub async fn register(&self, identifier: &str, secret: &str) -> Result<(), SessionError> {
        *self.state.write() = SessionState::Authenticating;
        info!(identifier, "registering account");

        match self.api.register(identifier, secret).await {
            Ok(pair) => {
                self.establish(pair).await;
                Ok(())
            }
            Err(err) => {
                warn!(identifier, error = %err, "registration failed");
                *self.state.write() = SessionState::Unauthenticated;
                Err(err.into())
            }
        }
    }

    /// Revive a session from durable storage.
    ///
    /// Loads the persisted pair, probes it with an identity call, and falls
    /// back to one startup refresh when the probe is rejected. Returns `true`
    /// when a session was established. On total failure the store and vault
    /// are cleared and the session stays `Unauthenticated`.
    pub async fn restore(&self) -> bool {
        let loaded = match self.store.load_from_vault().await {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(error = %err, "failed to read persisted credentials");
                false
            }
        };
        if !loaded {
            debug!("no persisted session to restore");
            *self.state.write() = SessionState::Unauthenticated;
            return false;
        }

        let Some(pair) = self.store.get().await else {
            *self.state.write() = SessionState::Unauthenticated;
            return false;
        };

        if !pair.is_expired(0) {
            match self.api.whoami(&pair.access_token).await {
                Ok(principal) => {
                    info!(principal = %principal.identifier, "restored persisted session");
                    self.scheduler.arm(pair.expires_at);
                    *self.state.write() = SessionState::Authenticated;
                    return true;
                }
                Err(err) => {
                    debug!(error = %err, "persisted access credential rejected, trying refresh");
                }
            }
        }

        match self.coordinator.refresh(RefreshReason::Startup).await {
            Ok(pair) => {
                info!("restored session via startup refresh");
                self.scheduler.arm(pair.expires_at);
                true
            }
            Err(err) => {
                warn!(error = %err, "startup refresh failed, discarding persisted session");
                self.store.clear().await;
                *self.state.write() = SessionState::Unauthenticated;
                false
            }
        }
    }

    /// End the session.
    ///
    /// Disarms the proactive timer, cancels any in-flight refresh, then
    /// clears in-memory and durable credentials. Cancellation runs first and
    /// is awaited, so a refresh completing mid-logout cannot write a fresh
    /// pair back into a store already cleared; every pending waiter resolves
    /// with a cancellation outcome. Idempotent.
    pub async fn logout(&self) {
        info!("logging out");
        self.scheduler.disarm();
        self.coordinator.cancel_inflight().await;
        self.store.clear().await;
        *self.state.write() = SessionState::Unauthenticated;
    }

    /// Store the pair, start the proactive timer and mark authenticated.
    async fn establish(&self, pair: CredentialPair) {
        let expires_at = pair.expires_at;
        self.store.set(pair).await;
        self.scheduler.arm(expires_at);
        *self.state.write() = SessionState::Authenticated;
        info!(expires_at = %expires_at, "session established");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), SessionState::Authenticated | SessionState::Refreshing)
    }

    /// Seconds until the current access credential expires, if one is held.
    pub async fn seconds_until_expiry(&self) -> Option<i64> {
        self.store.get().await.map(|pair| pair.seconds_until_expiry())
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &ProactiveScheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the session lifecycle.
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::error::{AuthClientError, RefreshError};
    use crate::testing::{MemoryVault, MockAuthApi};

    fn manager(api: &Arc<MockAuthApi>, vault: &Arc<MemoryVault>) -> Arc<SessionManager> {
        SessionManager::new(
            Arc::clone(api) as Arc<dyn AuthApi>,
            Arc::clone(vault) as Arc<dyn CredentialVault>,
            &SessionConfig::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn login_establishes_session() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        let session = manager(&api, &vault);

        session.login("ops@example.com", "secret").await.unwrap();

        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(session.is_authenticated());
        assert!(session.scheduler().is_armed());
        // Credentials mirrored to durable storage
        assert!(vault.stored().is_some());
        assert!(session.seconds_until_expiry().await.unwrap() > 3500);
    }

    #[tokio::test]
    async fn rejected_login_stays_unauthenticated() {
        let api = Arc::new(MockAuthApi::new());
        api.push_login_result(Err(AuthClientError::Rejected {
            status: 401,
            message: "bad secret".to_string(),
        }));
        let vault = Arc::new(MemoryVault::default());
        let session = manager(&api, &vault);

        let err = session.login("ops@example.com", "wrong").await.unwrap_err();

        assert!(matches!(err, SessionError::Client(AuthClientError::Rejected { .. })));
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(session.store().is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn register_establishes_session() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        let session = manager(&api, &vault);

        session.register("new@example.com", "secret").await.unwrap();

        assert_eq!(session.state(), SessionState::Authenticated);
        let pair = session.store().get().await.unwrap();
        assert_eq!(pair.access_token, "access-register-new@example.com");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_with_valid_pair_probes_identity() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        vault.seed(CredentialPair::new("persisted".to_string(), "r0".to_string(), 3600));
        let session = manager(&api, &vault);

        assert!(session.restore().await);
        assert_eq!(session.state(), SessionState::Authenticated);
        // The still-valid pair is kept, no refresh dispatched
        assert_eq!(api.refresh_calls(), 0);
        assert_eq!(session.store().get().await.unwrap().access_token, "persisted");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_refreshes_when_probe_rejected() {
        let api = Arc::new(MockAuthApi::new());
        api.push_whoami_result(Err(AuthClientError::Rejected {
            status: 401,
            message: "expired".to_string(),
        }));
        let vault = Arc::new(MemoryVault::default());
        vault.seed(CredentialPair::new("revoked".to_string(), "r0".to_string(), 3600));
        let session = manager(&api, &vault);

        assert!(session.restore().await);
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_ne!(session.store().get().await.unwrap().access_token, "revoked");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_refreshes_expired_pair_without_probe() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        let mut pair = CredentialPair::new("old".to_string(), "r0".to_string(), 0);
        pair.expires_at = Utc::now() - chrono::Duration::seconds(10);
        vault.seed(pair);
        let session = manager(&api, &vault);

        assert!(session.restore().await);
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn restore_with_empty_vault() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        let session = manager(&api, &vault);

        assert!(!session.restore().await);
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_discards_pair_on_fatal_refresh() {
        let api = Arc::new(MockAuthApi::new());
        api.push_whoami_result(Err(AuthClientError::Rejected {
            status: 401,
            message: "expired".to_string(),
        }));
        api.push_refresh_result(Err(RefreshError::InvalidCredential("revoked".to_string())));
        let vault = Arc::new(MemoryVault::default());
        vault.seed(CredentialPair::new("old".to_string(), "r0".to_string(), 3600));
        let session = manager(&api, &vault);

        assert!(!session.restore().await);
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(vault.stored().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_tears_down_everything() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        let session = manager(&api, &vault);
        session.login("ops@example.com", "secret").await.unwrap();

        session.logout().await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(session.store().is_empty().await);
        assert!(vault.stored().is_none());
        assert!(!session.scheduler().is_armed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_resolves_inflight_waiters() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        let session = manager(&api, &vault);
        session.login("ops@example.com", "secret").await.unwrap();

        api.set_refresh_delay(Duration::from_secs(30));
        let waiter = {
            let coordinator = Arc::clone(session.coordinator());
            tokio::spawn(async move { coordinator.refresh(RefreshReason::Reactive).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.logout().await;

        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter left pending after logout")
            .unwrap();
        assert!(matches!(outcome, Err(RefreshError::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_during_refresh_leaves_no_credentials() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        let session = manager(&api, &vault);
        session.login("ops@example.com", "secret").await.unwrap();

        // Slow durable clear plus a refresh resolving mid-logout: the
        // refresh outcome must not repopulate an already-ended session.
        vault.set_write_delay(Duration::from_millis(300));
        api.set_refresh_delay(Duration::from_millis(100));
        let waiter = {
            let coordinator = Arc::clone(session.coordinator());
            tokio::spawn(async move { coordinator.refresh(RefreshReason::Reactive).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        session.logout().await;

        assert!(session.store().is_empty().await);
        assert!(vault.stored().is_none());
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(matches!(waiter.await.unwrap(), Err(RefreshError::Cancelled)));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let api = Arc::new(MockAuthApi::new());
        let vault = Arc::new(MemoryVault::default());
        let session = manager(&api, &vault);

        session.logout().await;
        session.logout().await;
        assert_eq!(session.state(), SessionState::Unauthenticated);
    }
}
