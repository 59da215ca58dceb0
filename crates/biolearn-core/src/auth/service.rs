//! Login, logout and password flows on top of the session store.
//!
//! `AuthService` is the only component that writes the session. Creating it
//! starts the background refresh loop; dropping it (or `shutdown`) stops it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use super::guard::LOGIN_ROUTE;
use super::navigation::Navigator;
use super::refresh::{self, RefreshLoop};
use super::session::{Session, SessionStore};
use super::storage::FileStore;
use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::models::{RegisterRequest, UserRecord};

pub struct AuthService {
    api: ApiClient,
    session: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    refresh_loop: RefreshLoop,
}

impl AuthService {
    /// Wire the service together and start the refresh loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        api: ApiClient,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
        refresh_period: Duration,
    ) -> Self {
        let refresh_loop = RefreshLoop::new(
            Arc::clone(&session),
            Arc::new(api.clone()),
            Arc::clone(&navigator),
            refresh_period,
        );
        refresh_loop.start();

        Self {
            api,
            session,
            navigator,
            refresh_loop,
        }
    }

    /// Build the service from configuration with a file-backed session.
    pub fn from_config(config: &Config, navigator: Arc<dyn Navigator>) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let api = ApiClient::from_config(config).context("Failed to create API client")?;
        let session = Arc::new(SessionStore::open(FileStore::new(data_dir)));
        Ok(Self::new(api, session, navigator, config.refresh_interval()))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserRecord, ApiError> {
        let payload = self.api.login(email, password).await?;
        if let Err(e) = self.session.save(&payload.token, &payload.user) {
            warn!(error = %e, "Failed to save session");
        }
        info!(user_id = payload.user.id, role = payload.user.role.as_str(), "Logged in");
        Ok(payload.user)
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, request: &RegisterRequest) -> Result<String, ApiError> {
        self.api.register(request).await
    }

    /// Tell the backend (best effort), then drop the local session.
    pub async fn logout(&self) {
        if let Some(token) = self.session.token() {
            if let Err(e) = self.api.logout(&token).await {
                warn!(error = %e, "Backend logout failed");
            }
        }
        if let Err(e) = self.session.clear() {
            warn!(error = %e, "Failed to clear session");
        }
        info!("Logged out");
        self.navigator.navigate(LOGIN_ROUTE);
    }

    /// Renew the token right away, regardless of how close it is to expiry.
    pub async fn refresh_now(&self) -> Result<UserRecord, ApiError> {
        let token = self.session.bearer_token().ok_or(ApiError::NotLoggedIn)?;
        refresh::renew(&self.session, &self.api, self.navigator.as_ref(), &token).await
    }

    /// Replace the stored user after a profile edit.
    pub fn update_profile(&self, user: &UserRecord) -> Result<()> {
        self.session.update_user(user)
    }

    pub async fn forgot_password(&self, email: &str) -> Result<String, ApiError> {
        self.api.forgot_password(email).await
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<String, ApiError> {
        self.api.reset_password(token, new_password).await
    }

    /// `false` when the backend rejects the token; transport errors propagate.
    pub async fn verify_reset_token(&self, token: &str) -> Result<bool, ApiError> {
        match self.api.verify_reset_token(token).await {
            Ok(()) => Ok(true),
            Err(ApiError::Backend(message)) => {
                info!(%message, "Reset token rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.session.user()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    pub fn refresh_loop(&self) -> &RefreshLoop {
        &self.refresh_loop
    }

    /// Stop the refresh loop. No refresh fires afterwards.
    pub fn shutdown(&self) {
        self.refresh_loop.stop();
    }
}
