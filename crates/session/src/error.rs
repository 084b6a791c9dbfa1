//! Session error types
//!
//! Error taxonomy for the session stack, split by surface: refresh outcomes
//! fan out to every waiter, pipeline failures surface to a single caller, and
//! lifecycle operations wrap the auth client.

use thiserror::Error;

/// Outcome of a failed credential refresh
///
/// Cloneable so a single in-flight outcome can be fanned out to every queued
/// waiter.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    /// Transient transport failure (connect error, timeout, 5xx). The
    /// proactive path retries on its next natural cycle; never retried
    /// synchronously.
    #[error("refresh request failed: {0}")]
    Network(String),

    /// The refresh credential was rejected (invalid, expired, or revoked).
    /// Fatal for the session.
    #[error("refresh credential rejected: {0}")]
    InvalidCredential(String),

    /// The refresh endpoint returned an undecodable body. Treated as fatal to
    /// avoid looping on a broken server contract.
    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),

    /// The session was torn down while the refresh was pending.
    #[error("refresh cancelled by logout")]
    Cancelled,
}

impl RefreshError {
    /// Whether this error terminates the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidCredential(_) | Self::MalformedResponse(_))
    }
}

/// Failure surfaced by the request pipeline
#[derive(Debug, Error)]
pub enum AuthFailure {
    /// No credentials present; the caller must redirect to login.
    #[error("no active session")]
    NoSession,

    /// The request still failed authorization after one retry. The session is
    /// assumed unrecoverable.
    #[error("request unauthorized after credential refresh")]
    RetryExhausted,

    /// Transport-level dispatch failure (not an authorization problem).
    #[error("request transport failed: {0}")]
    Transport(String),

    /// The coordinated refresh required by this request failed.
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Errors from the auth endpoints used by login, register, and the identity
/// probe
#[derive(Debug, Error)]
pub enum AuthClientError {
    /// HTTP transport failure or timeout
    #[error("auth request failed: {0}")]
    Network(String),

    /// The server rejected the operation
    #[error("auth request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, when readable
        message: String,
    },

    /// Undecodable response body
    #[error("malformed auth response: {0}")]
    MalformedResponse(String),
}

/// Errors from the durable credential store
#[derive(Debug, Error)]
pub enum VaultError {
    /// Underlying storage backend failed
    #[error("credential storage failed: {0}")]
    Backend(String),

    /// Persisted payload could not be decoded
    #[error("persisted credentials unreadable: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err.to_string())
    }
}

/// Errors from session lifecycle operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Credential issuance or identity probe failed
    #[error(transparent)]
    Client(#[from] AuthClientError),

    /// Refresh during startup restore failed
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}
