//! Session and token lifecycle for the Freightdesk client.
//!
//! Keeps a short-lived access credential valid across many concurrent
//! outbound calls: refreshes it transparently with a longer-lived refresh
//! credential, never races a refresh with itself, and never leaves a caller
//! stuck waiting on one.
//!
//! # Architecture
//!
//! ```text
//!  RequestPipeline ──401──┐
//!                         ├──> RefreshCoordinator ──> AuthApi (/auth/refresh)
//!  ProactiveScheduler ────┘          │
//!                                    v
//!  SessionManager <────────────> TokenStore <──mirror──> CredentialVault
//! ```
//!
//! [`SessionManager`] owns the stack; the [`RequestPipeline`] is the only
//! path application requests take, and the [`RefreshCoordinator`] is the
//! single-flight gate both the reactive and proactive triggers share.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod client;
pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod testing;
pub mod traits;
pub mod types;
pub mod vault;

pub use client::AuthClient;
pub use coordinator::{RefreshCoordinator, RefreshReason};
pub use error::{AuthClientError, AuthFailure, RefreshError, SessionError, VaultError};
pub use lifecycle::SessionManager;
pub use pipeline::{RequestDescriptor, RequestPipeline};
pub use scheduler::ProactiveScheduler;
pub use store::TokenStore;
pub use traits::{AuthApi, CredentialVault};
pub use types::{CredentialPair, Principal, SessionConfig, SessionState, TokenResponse};
pub use vault::KeyringVault;
