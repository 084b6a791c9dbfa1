//! Keyring-backed durable credential storage
//!
//! Persists the credential pair in the platform keychain (macOS Keychain,
//! Windows Credential Manager, Linux Secret Service) under three entries:
//! the access token, the refresh token, and a JSON metadata blob carrying the
//! expiry so a restart can compute the remaining TTL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde_json::json;
use tracing::debug;

use crate::error::VaultError;
use crate::traits::CredentialVault;
use crate::types::CredentialPair;

const ACCESS_ENTRY: &str = "access";
const REFRESH_ENTRY: &str = "refresh";
const METADATA_ENTRY: &str = "metadata";

/// Platform keychain vault
pub struct KeyringVault {
    service: String,
}

impl KeyringVault {
    /// Create a vault namespaced by a keychain service name
    /// (e.g., "Freightdesk.session").
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn entry(&self, name: &str) -> Result<Entry, VaultError> {
        Entry::new(&self.service, name).map_err(|err| VaultError::Backend(err.to_string()))
    }

    fn read_entry(&self, name: &str) -> Result<Option<String>, VaultError> {
        match self.entry(name)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(VaultError::Backend(err.to_string())),
        }
    }

    fn write_entry(&self, name: &str, value: &str) -> Result<(), VaultError> {
        self.entry(name)?
            .set_password(value)
            .map_err(|err| VaultError::Backend(err.to_string()))
    }

    fn delete_entry(&self, name: &str) -> Result<(), VaultError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(VaultError::Backend(err.to_string())),
        }
    }
}

#[async_trait]
impl CredentialVault for KeyringVault {
    async fn load(&self) -> Result<Option<CredentialPair>, VaultError> {
        let Some(access_token) = self.read_entry(ACCESS_ENTRY)? else {
            return Ok(None);
        };
        let Some(refresh_token) = self.read_entry(REFRESH_ENTRY)? else {
            return Ok(None);
        };

        let metadata_raw = self.read_entry(METADATA_ENTRY)?.unwrap_or_default();
        let metadata: serde_json::Value = serde_json::from_str(&metadata_raw)
            .map_err(|err| VaultError::Serde(err.to_string()))?;

        let expires_at = metadata
            .get("expires_at")
            .and_then(serde_json::Value::as_i64)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .ok_or_else(|| VaultError::Serde("missing expires_at".to_string()))?;

        debug!("loaded persisted credentials from keychain");
        Ok(Some(CredentialPair { access_token, refresh_token, expires_at }))
    }

    async fn save(&self, pair: &CredentialPair) -> Result<(), VaultError> {
        self.write_entry(ACCESS_ENTRY, &pair.access_token)?;
        self.write_entry(REFRESH_ENTRY, &pair.refresh_token)?;

        let metadata = json!({ "expires_at": pair.expires_at.timestamp() });
        self.write_entry(METADATA_ENTRY, &serde_json::to_string(&metadata)?)?;

        debug!("persisted credentials to keychain");
        Ok(())
    }

    async fn clear(&self) -> Result<(), VaultError> {
        self.delete_entry(ACCESS_ENTRY)?;
        self.delete_entry(REFRESH_ENTRY)?;
        self.delete_entry(METADATA_ENTRY)?;

        debug!("cleared persisted credentials");
        Ok(())
    }
}
