//! API client for the biolearn REST backend.
//!
//! Covers the `/auth/*` contract: login, register, logout, token refresh and
//! the password reset flow. Every response is unwrapped from its
//! `GenericResponseV2` envelope.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ApiError, GenericResponseV2};
use crate::auth::TokenRefresher;
use crate::config::{Config, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::models::{
    AuthPayload, ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest,
};

/// API client for the biolearn backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client for the given base URL
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::with_timeout(&config.api_base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authenticate and return the token plus user snapshot
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let request = self.client.post(self.url("/auth/login")).json(&body);
        Self::send::<AuthPayload>(request, "/auth/login").await?.into_result()
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<String, ApiError> {
        let request = self.client.post(self.url("/auth/register")).json(request);
        Self::send::<serde_json::Value>(request, "/auth/register")
            .await?
            .into_message()
    }

    pub async fn logout(&self, token: &str) -> Result<String, ApiError> {
        let request = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(token);
        Self::send::<serde_json::Value>(request, "/auth/logout")
            .await?
            .into_message()
    }

    /// Exchange a still-valid token for a fresh one
    pub async fn refresh_token(&self, token: &str) -> Result<AuthPayload, ApiError> {
        let request = self
            .client
            .post(self.url("/auth/refresh"))
            .bearer_auth(token);
        Self::send::<AuthPayload>(request, "/auth/refresh").await?.into_result()
    }

    pub async fn forgot_password(&self, email: &str) -> Result<String, ApiError> {
        let body = ForgotPasswordRequest {
            email: email.to_string(),
        };
        let request = self.client.post(self.url("/auth/forgot-password")).json(&body);
        Self::send::<serde_json::Value>(request, "/auth/forgot-password")
            .await?
            .into_message()
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<String, ApiError> {
        let body = ResetPasswordRequest {
            token: token.to_string(),
            new_password: new_password.to_string(),
        };
        let request = self.client.post(self.url("/auth/reset-password")).json(&body);
        Self::send::<serde_json::Value>(request, "/auth/reset-password")
            .await?
            .into_message()
    }

    /// Succeeds when the backend accepts the reset token
    pub async fn verify_reset_token(&self, token: &str) -> Result<(), ApiError> {
        let request = self
            .client
            .get(self.url("/auth/verify-reset-token"))
            .query(&[("token", token)]);
        Self::send::<serde_json::Value>(request, "/auth/verify-reset-token")
            .await?
            .into_message()
            .map(|_| ())
    }

    /// Send a request and decode its envelope.
    ///
    /// Non-2xx responses that still carry an envelope are returned as-is so
    /// the backend's message reaches the caller; anything else maps through
    /// `ApiError::from_status`.
    async fn send<T: DeserializeOwned>(
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<GenericResponseV2<T>, ApiError> {
        let response = request.send().await?;
        Self::decode(response, endpoint).await
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        endpoint: &str,
    ) -> Result<GenericResponseV2<T>, ApiError> {
        let status = response.status();
        let body = response.text().await?;
        debug!(endpoint, status = status.as_u16(), "Received response");
        Self::parse_envelope(status, &body, endpoint)
    }

    /// An `"ERROR"` envelope keeps its message even when `_embedded` does not
    /// fit `T` (validation maps and the like).
    fn parse_envelope<T: DeserializeOwned>(
        status: StatusCode,
        body: &str,
        endpoint: &str,
    ) -> Result<GenericResponseV2<T>, ApiError> {
        let typed_error = match serde_json::from_str::<GenericResponseV2<T>>(body) {
            Ok(envelope) if status.is_success() || !envelope.is_success() => return Ok(envelope),
            Ok(_) => return Err(ApiError::from_status(status, body)),
            Err(e) => e,
        };

        if let Ok(untyped) = serde_json::from_str::<GenericResponseV2<serde_json::Value>>(body) {
            if !untyped.is_success() {
                return Ok(GenericResponseV2 {
                    status: untyped.status,
                    message: untyped.message,
                    embedded: None,
                });
            }
        }

        if status.is_success() {
            warn!(endpoint, error = %typed_error, "Failed to parse response envelope");
            Err(ApiError::InvalidResponse(format!(
                "Failed to parse response from {}: {}",
                endpoint, typed_error
            )))
        } else {
            Err(ApiError::from_status(status, body))
        }
    }
}

impl TokenRefresher for ApiClient {
    fn refresh<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<AuthPayload, ApiError>> {
        Box::pin(self.refresh_token(token))
    }
}
