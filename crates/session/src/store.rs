//! In-memory token store with a durable mirror
//!
//! Thread-safe holder of the current credential pair. `get` returns an
//! immutable snapshot so a caller can never observe a partially-written pair;
//! `set`/`clear` mirror to the [`CredentialVault`] side-channel so the session
//! survives process restarts.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::error::VaultError;
use crate::traits::CredentialVault;
use crate::types::CredentialPair;

/// Thread-safe credential holder
pub struct TokenStore {
    current: RwLock<Option<CredentialPair>>,
    vault: Arc<dyn CredentialVault>,
}

impl TokenStore {
    /// Create an empty store mirrored to the given vault.
    #[must_use]
    pub fn new(vault: Arc<dyn CredentialVault>) -> Self {
        Self { current: RwLock::new(None), vault }
    }

    /// Get a snapshot of the current pair, or `None` when unauthenticated.
    pub async fn get(&self) -> Option<CredentialPair> {
        self.current.read().await.clone()
    }

    /// Check whether a pair is held.
    pub async fn is_empty(&self) -> bool {
        self.current.read().await.is_none()
    }

    /// Replace the current pair and mirror it to durable storage.
    ///
    /// A vault write failure is logged but does not fail the in-memory
    /// update; the session keeps working and only restart recovery is lost.
    pub async fn set(&self, pair: CredentialPair) {
        *self.current.write().await = Some(pair.clone());

        if let Err(err) = self.vault.save(&pair).await {
            warn!(error = %err, "failed to mirror credentials to durable storage");
        }
    }

    /// Drop the current pair and clear durable storage.
    pub async fn clear(&self) {
        *self.current.write().await = None;

        if let Err(err) = self.vault.clear().await {
            warn!(error = %err, "failed to clear durable credential storage");
        }
    }

    /// Load a persisted pair into memory, if one exists.
    ///
    /// Called once at startup, before the identity probe.
    ///
    /// # Errors
    /// Returns error if the vault backend fails or its payload is unreadable.
    pub async fn load_from_vault(&self) -> Result<bool, VaultError> {
        match self.vault.load().await? {
            Some(pair) => {
                *self.current.write().await = Some(pair);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
