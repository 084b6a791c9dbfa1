//! Authenticated request pipeline
//!
//! Every outbound application call goes through [`RequestPipeline`]: it
//! attaches the current access credential, and on an authorization rejection
//! refreshes through the coordinator and redispatches exactly once. A second
//! rejection ends the session rather than looping.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, warn};

use crate::coordinator::RefreshReason;
use crate::error::AuthFailure;
use crate::lifecycle::SessionManager;
use crate::types::SessionConfig;

/// An application request to dispatch with authentication attached
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl RequestDescriptor {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: Method::GET, path: path.into(), body: None }
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self { method: Method::POST, path: path.into(), body: Some(body) }
    }
}

/// Dispatches authenticated requests with a single refresh-and-retry
pub struct RequestPipeline {
    http: Client,
    base_url: String,
    timeout: Duration,
    session: Arc<SessionManager>,
}

impl RequestPipeline {
    #[must_use]
    pub fn new(session: Arc<SessionManager>, config: &SessionConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
            session,
        }
    }

    /// Dispatch the request with the current access credential.
    ///
    /// A request is sent at most twice: the original dispatch, and one
    /// redispatch after a reactive refresh when the server answered 401.
    /// Responses other than 401 are returned unchanged, whatever their
    /// status; interpreting them is the caller's business.
    ///
    /// # Errors
    /// [`AuthFailure::NoSession`] without any dispatch when no credential is
    /// held, [`AuthFailure::RetryExhausted`] when the redispatch is rejected
    /// again, [`AuthFailure::Refresh`] when the reactive refresh fails, and
    /// [`AuthFailure::Transport`] for connection or deadline failures.
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<Response, AuthFailure> {
        let Some(mut pair) = self.session.store().get().await else {
            return Err(AuthFailure::NoSession);
        };

        // Never attach a credential known to be expired; refresh first.
        if pair.is_expired(0) {
            debug!(path = %request.path, "access credential expired before dispatch");
            pair = self.refresh_for_retry().await?;
        }

        let response = self.dispatch(request, &pair.access_token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path = %request.path, "request rejected, refreshing and retrying once");
        let pair = self.refresh_for_retry().await?;

        let retry = self.dispatch(request, &pair.access_token).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(path = %request.path, "retry rejected with fresh credential, ending session");
            self.session.logout().await;
            return Err(AuthFailure::RetryExhausted);
        }
        Ok(retry)
    }

    /// Refresh through the coordinator, ending the session on fatal failure.
    ///
    /// Transient failures surface to this caller only; the session and any
    /// stored credential stay intact for the next trigger.
    async fn refresh_for_retry(&self) -> Result<crate::types::CredentialPair, AuthFailure> {
        match self.session.coordinator().refresh(RefreshReason::Reactive).await {
            Ok(pair) => Ok(pair),
            Err(err) if err.is_fatal() => {
                self.session.logout().await;
                Err(AuthFailure::Refresh(err))
            }
            Err(err) => Err(AuthFailure::Refresh(err)),
        }
    }

    /// One dispatch with the bearer credential attached and a deadline.
    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        access_token: &str,
    ) -> Result<Response, AuthFailure> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .bearer_auth(access_token);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        match tokio::time::timeout(self.timeout, builder.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(AuthFailure::Transport(err.to_string())),
            Err(_) => Err(AuthFailure::Transport(format!(
                "request to {url} timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
