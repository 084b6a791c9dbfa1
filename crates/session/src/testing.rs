//! In-memory test doubles for the auth API and credential vault
//!
//! Used by this crate's unit tests and available to downstream crates that
//! want to exercise session behavior without a server or an OS keychain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AuthClientError, RefreshError, VaultError};
use crate::traits::{AuthApi, CredentialVault};
use crate::types::{CredentialPair, Principal};

/// Scriptable [`AuthApi`] double
///
/// Each endpoint has a result queue; when a queue is empty the call succeeds
/// with a generated credential pair. Refresh calls are counted and their
/// presented token recorded, which is what the single-flight and rotation
/// tests assert on.
#[derive(Default)]
pub struct MockAuthApi {
    refresh_calls: AtomicUsize,
    refresh_delay: Mutex<Duration>,
    refresh_results: Mutex<VecDeque<Result<CredentialPair, RefreshError>>>,
    last_refresh_token: Mutex<Option<String>>,
    login_results: Mutex<VecDeque<Result<CredentialPair, AuthClientError>>>,
    register_results: Mutex<VecDeque<Result<CredentialPair, AuthClientError>>>,
    whoami_results: Mutex<VecDeque<Result<Principal, AuthClientError>>>,
}

impl MockAuthApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refresh network calls dispatched so far.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Delay applied to every refresh call, simulating network latency.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    /// Queue an outcome for the next refresh call.
    pub fn push_refresh_result(&self, result: Result<CredentialPair, RefreshError>) {
        self.refresh_results.lock().push_back(result);
    }

    /// Queue an outcome for the next login call.
    pub fn push_login_result(&self, result: Result<CredentialPair, AuthClientError>) {
        self.login_results.lock().push_back(result);
    }

    /// Queue an outcome for the next register call.
    pub fn push_register_result(&self, result: Result<CredentialPair, AuthClientError>) {
        self.register_results.lock().push_back(result);
    }

    /// Queue an outcome for the next whoami call.
    pub fn push_whoami_result(&self, result: Result<Principal, AuthClientError>) {
        self.whoami_results.lock().push_back(result);
    }

    /// The refresh token presented by the most recent refresh call.
    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().clone()
    }

    fn generated_pair(n: usize) -> CredentialPair {
        CredentialPair::new(format!("access-{n}"), format!("refresh-{n}"), 3600)
    }
}

#[async_trait]
impl AuthApi for MockAuthApi {
    async fn login(
        &self,
        identifier: &str,
        _secret: &str,
    ) -> Result<CredentialPair, AuthClientError> {
        match self.login_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(CredentialPair::new(
                format!("access-login-{identifier}"),
                format!("refresh-login-{identifier}"),
                3600,
            )),
        }
    }

    async fn register(
        &self,
        identifier: &str,
        _secret: &str,
    ) -> Result<CredentialPair, AuthClientError> {
        match self.register_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(CredentialPair::new(
                format!("access-register-{identifier}"),
                format!("refresh-register-{identifier}"),
                3600,
            )),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, RefreshError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_refresh_token.lock() = Some(refresh_token.to_string());

        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.refresh_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(Self::generated_pair(n)),
        }
    }

    async fn whoami(&self, _access_token: &str) -> Result<Principal, AuthClientError> {
        match self.whoami_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(Principal {
                id: "user-1".to_string(),
                identifier: "dispatcher@example.com".to_string(),
            }),
        }
    }
}

/// [`CredentialVault`] double backed by a mutex-held slot
#[derive(Default)]
pub struct MemoryVault {
    stored: Mutex<Option<CredentialPair>>,
    fail_writes: Mutex<bool>,
    write_delay: Mutex<Duration>,
}

impl MemoryVault {
    /// Pre-populate the vault, as if a previous process persisted a pair.
    pub fn seed(&self, pair: CredentialPair) {
        *self.stored.lock() = Some(pair);
    }

    /// The currently persisted pair, if any.
    pub fn stored(&self) -> Option<CredentialPair> {
        self.stored.lock().clone()
    }

    /// Make subsequent save/clear calls fail with a backend error.
    pub fn fail_writes(&self) {
        *self.fail_writes.lock() = true;
    }

    /// Delay applied to every save/clear, simulating a slow keychain backend.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    async fn simulate_backend(&self) -> Result<(), VaultError> {
        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_writes.lock() {
            return Err(VaultError::Backend("simulated write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialVault for MemoryVault {
    async fn load(&self) -> Result<Option<CredentialPair>, VaultError> {
        Ok(self.stored.lock().clone())
    }

    async fn save(&self, pair: &CredentialPair) -> Result<(), VaultError> {
        self.simulate_backend().await?;
        *self.stored.lock() = Some(pair.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), VaultError> {
        self.simulate_backend().await?;
        *self.stored.lock() = None;
        Ok(())
    }
}
