//! Core session types
//!
//! Defines the credential pair held by the session, the wire format returned
//! by the auth endpoints, and the session configuration shared by the auth
//! client, scheduler, and request pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh credential pair with its expiry
///
/// Both values are opaque strings to this layer. The expiry is an absolute
/// timestamp calculated from the server-reported TTL at issuance time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Short-lived token attached to individual requests
    pub access_token: String,

    /// Longer-lived token exchanged for a new access token; rotated on every
    /// successful refresh
    pub refresh_token: String,

    /// Absolute expiration timestamp of the access token (UTC)
    pub expires_at: DateTime<Utc>,
}

impl CredentialPair {
    /// Create a new pair with the expiry calculated from `expires_in` seconds.
    #[must_use]
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        }
    }

    /// Check if the access token is expired or will expire within the given
    /// margin.
    #[must_use]
    pub fn is_expired(&self, margin_seconds: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(margin_seconds) >= self.expires_at
    }

    /// Get seconds until the access token expires (negative if already past).
    #[must_use]
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }
}

/// Token response from the auth endpoints
///
/// Shared by issuance (login/register) and refresh; the refresh endpoint
/// always rotates `refresh_token`.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

impl From<TokenResponse> for CredentialPair {
    fn from(response: TokenResponse) -> Self {
        Self::new(response.access_token, response.refresh_token, response.expires_in)
    }
}

/// Current principal returned by the identity probe endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Principal {
    /// Server-side principal id
    pub id: String,
    /// Login identifier (e-mail for Freightdesk accounts)
    pub identifier: String,
}

/// Session lifecycle states
///
/// Exactly one state is live at a time; transitions are atomic with respect
/// to concurrent readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No credentials present
    Unauthenticated,
    /// Login/register in progress
    Authenticating,
    /// Valid credential pair held
    Authenticated,
    /// A credential refresh is in flight
    Refreshing,
}

/// Shared, atomically-swapped session state cell
pub(crate) type SessionStateCell = std::sync::Arc<parking_lot::RwLock<SessionState>>;

/// Configuration for the session stack
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL for the Freightdesk API (e.g., "https://api.freightdesk.io/v1")
    pub base_url: String,
    /// Refresh the access token this many seconds before expiry
    pub refresh_margin_seconds: i64,
    /// Deadline applied to every outbound request, including the refresh call
    pub request_timeout: std::time::Duration,
}

impl SessionConfig {
    /// Create a configuration with default margins for the given API base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.freightdesk.io/v1".to_string(),
            refresh_margin_seconds: 60,
            request_timeout: std::time::Duration::from_secs(30),
        }
    }
}
