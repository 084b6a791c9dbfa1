//! Single-flight refresh coordinator
//!
//! Turns N concurrent "please refresh" calls into exactly one network
//! operation and fans the outcome out to every waiter. The first caller
//! spawns an executor task; everyone else (including the proactive timer)
//! joins the in-flight operation by watching its outcome channel. The
//! executor publishes the outcome before releasing the slot, so a caller
//! arriving while the refresh is resolving observes the fresh result instead
//! of starting a second network call.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RefreshError;
use crate::store::TokenStore;
use crate::traits::AuthApi;
use crate::types::{SessionState, SessionStateCell};

/// What triggered a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Timer fired ahead of expiry
    Proactive,
    /// A request observed an authorization failure
    Reactive,
    /// Startup restore probing a persisted pair
    Startup,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proactive => write!(f, "proactive"),
            Self::Reactive => write!(f, "reactive"),
            Self::Startup => write!(f, "startup"),
        }
    }
}

type RefreshOutcome = Result<crate::types::CredentialPair, RefreshError>;
type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;
type InflightSlot = Arc<Mutex<Option<Inflight>>>;

/// State of the one permitted in-flight refresh
struct Inflight {
    id: u64,
    rx: OutcomeReceiver,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Single-flight executor for credential refreshes
///
/// Shared by the reactive path (request pipeline) and the proactive timer;
/// owning both call sites in one coordinator is what makes two simultaneous
/// refresh network calls impossible.
pub struct RefreshCoordinator {
    api: Arc<dyn AuthApi>,
    store: Arc<TokenStore>,
    state: SessionStateCell,
    inflight: InflightSlot,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<TokenStore>,
        state: SessionStateCell,
    ) -> Self {
        Self {
            api,
            store,
            state,
            inflight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Refresh the credential pair, joining any refresh already in flight.
    ///
    /// Every caller queued against the same in-flight operation resolves with
    /// the identical outcome. No waiter resolves before the network call
    /// completes, and no waiter is left pending: logout cancels the executor,
    /// which still publishes a [`RefreshError::Cancelled`] outcome.
    ///
    /// # Errors
    /// Returns the shared [`RefreshError`] when the refresh fails.
    pub async fn refresh(&self, reason: RefreshReason) -> RefreshOutcome {
        let rx = {
            let mut slot = self.inflight.lock();
            if let Some(inflight) = slot.as_ref() {
                debug!(%reason, "joining in-flight refresh");
                inflight.rx.clone()
            } else {
                let inflight = self.spawn_executor(reason);
                let rx = inflight.rx.clone();
                *slot = Some(inflight);
                rx
            }
        };

        Self::wait(rx).await
    }

    /// Cancel any in-flight refresh and wait until its waiters are resolved.
    ///
    /// Called on logout. Returns only after the executor has published a
    /// cancellation outcome, so no waiter remains pending afterwards.
    pub async fn cancel_inflight(&self) {
        let taken = self.inflight.lock().take();
        if let Some(inflight) = taken {
            debug!("cancelling in-flight refresh");
            inflight.cancel.cancel();
            let _ = inflight.handle.await;
        }
    }

    /// Spawn the executor task for a new refresh and return its slot entry.
    fn spawn_executor(&self, reason: RefreshReason) -> Inflight {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let api = Arc::clone(&self.api);
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        let slot = Arc::clone(&self.inflight);

        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                () = task_cancel.cancelled() => {
                    info!(%reason, "refresh cancelled");
                    Err(RefreshError::Cancelled)
                }
                outcome = Self::execute(api, store, state, reason) => outcome,
            };

            // Publish before releasing the slot: a caller arriving between
            // the two steps joins the channel and sees the outcome, so it
            // never dispatches a second network call for the same trigger.
            let _ = tx.send(Some(outcome));

            let mut slot = slot.lock();
            if slot.as_ref().is_some_and(|inflight| inflight.id == id) {
                *slot = None;
            }
        });

        Inflight { id, rx, cancel, handle }
    }

    /// Await the outcome of an in-flight refresh.
    async fn wait(mut rx: OutcomeReceiver) -> RefreshOutcome {
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(RefreshError::Cancelled)),
            // Sender dropped without publishing: the session was torn down.
            Err(_) => Err(RefreshError::Cancelled),
        }
    }

    /// The sole executor: perform one network refresh and apply the outcome.
    async fn execute(
        api: Arc<dyn AuthApi>,
        store: Arc<TokenStore>,
        state: SessionStateCell,
        reason: RefreshReason,
    ) -> RefreshOutcome {
        let Some(current) = store.get().await else {
            warn!(%reason, "refresh requested without stored credentials");
            *state.write() = SessionState::Unauthenticated;
            return Err(RefreshError::InvalidCredential(
                "no refresh credential available".to_string(),
            ));
        };

        *state.write() = SessionState::Refreshing;
        info!(%reason, "refreshing access credential");

        match api.refresh(&current.refresh_token).await {
            Ok(pair) => {
                // The rotated pair replaces the old one; the previous refresh
                // value is invalid from here on.
                store.set(pair.clone()).await;
                *state.write() = SessionState::Authenticated;
                info!(%reason, expires_at = %pair.expires_at, "credential refresh succeeded");
                Ok(pair)
            }
            Err(err) if err.is_fatal() => {
                error!(%reason, error = %err, "credential refresh failed fatally, ending session");
                store.clear().await;
                *state.write() = SessionState::Unauthenticated;
                Err(err)
            }
            Err(err) => {
                warn!(%reason, error = %err, "credential refresh failed, deferring to next trigger");
                *state.write() = SessionState::Authenticated;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the refresh coordinator.
    use std::time::Duration;

    use super::*;
    use crate::testing::{MemoryVault, MockAuthApi};
    use crate::types::CredentialPair;

    fn state_cell() -> SessionStateCell {
        Arc::new(parking_lot::RwLock::new(SessionState::Authenticated))
    }

    async fn seeded_coordinator(api: Arc<MockAuthApi>) -> (Arc<RefreshCoordinator>, Arc<TokenStore>, SessionStateCell) {
        let store = Arc::new(TokenStore::new(Arc::new(MemoryVault::default())));
        store.set(CredentialPair::new("stale".to_string(), "r0".to_string(), 3600)).await;

        let state = state_cell();
        let coordinator =
            Arc::new(RefreshCoordinator::new(api, Arc::clone(&store), Arc::clone(&state)));
        (coordinator, store, state)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_callers_share_one_network_call() {
        let api = Arc::new(MockAuthApi::new());
        api.set_refresh_delay(Duration::from_millis(100));
        let (coordinator, store, _) = seeded_coordinator(Arc::clone(&api)).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator.refresh(RefreshReason::Reactive).await
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap().access_token);
        }

        // All five callers resolved with the same pair from one call
        assert_eq!(api.refresh_calls(), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
        assert_eq!(store.get().await.unwrap().access_token, tokens[0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn proactive_trigger_joins_reactive_refresh() {
        let api = Arc::new(MockAuthApi::new());
        api.set_refresh_delay(Duration::from_millis(100));
        let (coordinator, _, _) = seeded_coordinator(Arc::clone(&api)).await;

        let reactive = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh(RefreshReason::Reactive).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Timer fires mid-flight: it must not start a second call
        let proactive = coordinator.refresh(RefreshReason::Proactive).await;

        assert!(proactive.is_ok());
        assert!(reactive.await.unwrap().is_ok());
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn sequential_triggers_each_dispatch() {
        let api = Arc::new(MockAuthApi::new());
        let (coordinator, _, _) = seeded_coordinator(Arc::clone(&api)).await;

        coordinator.refresh(RefreshReason::Reactive).await.unwrap();
        coordinator.refresh(RefreshReason::Proactive).await.unwrap();

        // A new trigger after full completion starts a fresh call
        assert_eq!(api.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_used_next_time() {
        let api = Arc::new(MockAuthApi::new());
        let (coordinator, _, _) = seeded_coordinator(Arc::clone(&api)).await;

        let first = coordinator.refresh(RefreshReason::Reactive).await.unwrap();
        coordinator.refresh(RefreshReason::Reactive).await.unwrap();

        // The second exchange presents the rotated value, never the original
        assert_eq!(api.last_refresh_token(), Some(first.refresh_token));
    }

    #[tokio::test]
    async fn fatal_failure_clears_store_and_session() {
        let api = Arc::new(MockAuthApi::new());
        api.push_refresh_result(Err(RefreshError::InvalidCredential("revoked".to_string())));
        let (coordinator, store, state) = seeded_coordinator(Arc::clone(&api)).await;

        let err = coordinator.refresh(RefreshReason::Reactive).await.unwrap_err();

        assert!(matches!(err, RefreshError::InvalidCredential(_)));
        assert!(store.is_empty().await);
        assert_eq!(*state.read(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn transient_failure_keeps_store() {
        let api = Arc::new(MockAuthApi::new());
        api.push_refresh_result(Err(RefreshError::Network("connection reset".to_string())));
        let (coordinator, store, state) = seeded_coordinator(Arc::clone(&api)).await;

        let err = coordinator.refresh(RefreshReason::Proactive).await.unwrap_err();

        assert!(matches!(err, RefreshError::Network(_)));
        assert_eq!(store.get().await.unwrap().access_token, "stale");
        assert_eq!(*state.read(), SessionState::Authenticated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fatal_failure_fans_out_to_all_waiters() {
        let api = Arc::new(MockAuthApi::new());
        api.set_refresh_delay(Duration::from_millis(50));
        api.push_refresh_result(Err(RefreshError::MalformedResponse("not json".to_string())));
        let (coordinator, _, _) = seeded_coordinator(Arc::clone(&api)).await;

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator.refresh(RefreshReason::Reactive).await
            }));
        }

        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                Err(RefreshError::MalformedResponse(_))
            ));
        }
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn empty_store_rejects_without_network_call() {
        let api = Arc::new(MockAuthApi::new());
        let store = Arc::new(TokenStore::new(Arc::new(MemoryVault::default())));
        let coordinator = RefreshCoordinator::new(Arc::clone(&api) as Arc<dyn AuthApi>, store, state_cell());

        let err = coordinator.refresh(RefreshReason::Proactive).await.unwrap_err();

        assert!(matches!(err, RefreshError::InvalidCredential(_)));
        assert_eq!(api.refresh_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_resolves_every_waiter() {
        let api = Arc::new(MockAuthApi::new());
        api.set_refresh_delay(Duration::from_secs(30));
        let (coordinator, _, _) = seeded_coordinator(Arc::clone(&api)).await;

        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator.refresh(RefreshReason::Reactive).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        coordinator.cancel_inflight().await;

        // Every waiter resolves promptly with a cancellation outcome
        for handle in handles {
            let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("waiter left pending after cancel")
                .unwrap();
            assert!(matches!(outcome, Err(RefreshError::Cancelled)));
        }
    }

    #[tokio::test]
    async fn cancel_without_inflight_is_a_noop() {
        let api = Arc::new(MockAuthApi::new());
        let (coordinator, _, _) = seeded_coordinator(api).await;
        coordinator.cancel_inflight().await;
    }

    #[tokio::test]
    async fn refresh_after_cancel_starts_fresh() {
        let api = Arc::new(MockAuthApi::new());
        api.set_refresh_delay(Duration::from_secs(30));
        let (coordinator, store, _) = seeded_coordinator(Arc::clone(&api)).await;

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.refresh(RefreshReason::Reactive).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.cancel_inflight().await;
        assert!(matches!(waiter.await.unwrap(), Err(RefreshError::Cancelled)));

        // The executor slot was released; a new trigger can refresh again
        api.set_refresh_delay(Duration::ZERO);
        store.set(CredentialPair::new("stale2".to_string(), "r1".to_string(), 3600)).await;
        let pair = coordinator.refresh(RefreshReason::Reactive).await.unwrap();
        assert_ne!(pair.access_token, "stale2");
    }
}
