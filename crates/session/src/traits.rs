//! Traits for auth endpoints and durable credential storage
//!
//! These traits are the dependency-injection seams for the session stack:
//! the coordinator and lifecycle talk to the auth server through [`AuthApi`]
//! and to persistence through [`CredentialVault`], so both can be replaced
//! with in-memory doubles in tests.

use async_trait::async_trait;

use crate::error::{AuthClientError, RefreshError, VaultError};
use crate::types::{CredentialPair, Principal};

/// Operations against the external credential-issuing collaborator
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Issue credentials for an existing account.
    ///
    /// # Errors
    /// Returns error if the request fails or the server rejects the secret.
    async fn login(&self, identifier: &str, secret: &str)
        -> Result<CredentialPair, AuthClientError>;

    /// Create an account and issue its first credentials.
    ///
    /// # Errors
    /// Returns error if the request fails or the identifier is taken.
    async fn register(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<CredentialPair, AuthClientError>;

    /// Exchange a refresh token for a new, rotated credential pair.
    ///
    /// # Errors
    /// Returns [`RefreshError::InvalidCredential`] when the server rejects the
    /// refresh value, [`RefreshError::MalformedResponse`] when the body cannot
    /// be decoded, and [`RefreshError::Network`] for transport failures.
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, RefreshError>;

    /// Identity probe: fetch the principal the access token belongs to.
    ///
    /// Used at startup to validate a restored credential pair.
    ///
    /// # Errors
    /// Returns error if the token is rejected or the request fails.
    async fn whoami(&self, access_token: &str) -> Result<Principal, AuthClientError>;
}

/// Durable side-channel persisting credentials across process restarts
///
/// Read once at startup, written on every successful issuance/refresh,
/// cleared on logout.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Load the persisted pair, if any.
    ///
    /// # Errors
    /// Returns error if the backend fails or the payload is unreadable.
    async fn load(&self) -> Result<Option<CredentialPair>, VaultError>;

    /// Persist the pair, replacing any previous one.
    ///
    /// # Errors
    /// Returns error if the backend fails.
    async fn save(&self, pair: &CredentialPair) -> Result<(), VaultError>;

    /// Remove any persisted pair (idempotent).
    ///
    /// # Errors
    /// Returns error if the backend fails.
    async fn clear(&self) -> Result<(), VaultError>;
}
