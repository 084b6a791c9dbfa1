//! HTTP client for the auth endpoints
//!
//! Implements [`AuthApi`] against the Freightdesk auth surface:
//! - `POST /auth/login` and `POST /auth/register` issue a credential pair
//! - `POST /auth/refresh` exchanges a refresh token for a rotated pair
//! - `GET /auth/me` returns the current principal (identity probe)
//!
//! Every call carries the configured deadline; exceeding it is reported as a
//! network-class error, never left pending.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::debug;

use crate::error::{AuthClientError, RefreshError};
use crate::traits::AuthApi;
use crate::types::{CredentialPair, Principal, SessionConfig, TokenResponse};

/// Auth endpoint client
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl AuthClient {
    /// Create a client for the configured API base URL.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { http, base_url: config.base_url.clone(), timeout: config.request_timeout }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a credential-issuing request and decode the token response.
    async fn issue(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<CredentialPair, AuthClientError> {
        let url = self.url(path);
        debug!(url = %url, "issuing credentials");

        let send = self.http.post(&url).json(&body).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return Err(AuthClientError::Network(err.to_string())),
            Err(_) => {
                return Err(AuthClientError::Network(format!(
                    "timed out after {:?}",
                    self.timeout
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthClientError::Rejected { status: status.as_u16(), message });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|err| AuthClientError::MalformedResponse(err.to_string()))?;

        Ok(token_response.into())
    }
}

#[async_trait]
impl AuthApi for AuthClient {
    async fn login(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<CredentialPair, AuthClientError> {
        self.issue("/auth/login", json!({ "identifier": identifier, "secret": secret })).await
    }

    async fn register(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<CredentialPair, AuthClientError> {
        self.issue("/auth/register", json!({ "identifier": identifier, "secret": secret })).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, RefreshError> {
        let url = self.url("/auth/refresh");
        debug!(url = %url, "exchanging refresh token");

        let send = self.http.post(&url).json(&json!({ "refresh_token": refresh_token })).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return Err(RefreshError::Network(err.to_string())),
            Err(_) => {
                return Err(RefreshError::Network(format!("timed out after {:?}", self.timeout)))
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = response.text().await.unwrap_or_default();
            return Err(RefreshError::InvalidCredential(message));
        }
        if !status.is_success() {
            return Err(RefreshError::Network(format!("refresh endpoint returned {status}")));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|err| RefreshError::MalformedResponse(err.to_string()))?;

        Ok(token_response.into())
    }

    async fn whoami(&self, access_token: &str) -> Result<Principal, AuthClientError> {
        let url = self.url("/auth/me");
        debug!(url = %url, "identity probe");

        let send = self.http.get(&url).bearer_auth(access_token).send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return Err(AuthClientError::Network(err.to_string())),
            Err(_) => {
                return Err(AuthClientError::Network(format!(
                    "timed out after {:?}",
                    self.timeout
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthClientError::Rejected { status: status.as_u16(), message });
        }

        response.json().await.map_err(|err| AuthClientError::MalformedResponse(err.to_string()))
    }
}
