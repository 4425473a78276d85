//! Session lifecycle: the gate every API-calling operation passes through
//!
//! The session state is derived from the stored record on every call and is
//! never persisted:
//!
//! - LoggedOut: no tokens at all
//! - Valid: access token present, expiry unset or more than `EXPIRY_BUFFER` away
//! - Expired: access token missing or expiring; refreshable when a refresh token exists
//!
//! An expired, refreshable session is refreshed exactly once. Success is
//! persisted before the new token is returned; failure persists nothing and
//! never falls back to the stale token.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_CALLBACK_PORT, EXPIRY_BUFFER, LOGIN_TIMEOUT};
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{Error, Result};
use crate::flow::{AuthorizeHandler, OAuthFlow, http_client};

/// Session state derived from a credential record at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Valid,
    Expired { refreshable: bool },
}

/// Classify `credentials` as seen at `now`. Pure; no I/O.
pub fn classify(credentials: &Credentials, now: DateTime<Utc>) -> SessionState {
    if !credentials.has_tokens() {
        return SessionState::LoggedOut;
    }

    let buffer = TimeDelta::seconds(EXPIRY_BUFFER.as_secs() as i64);
    let fresh = match credentials.expires_at {
        None => true,
        Some(expires_at) => expires_at > now + buffer,
    };
    if !credentials.access_token.is_empty() && fresh {
        return SessionState::Valid;
    }

    SessionState::Expired {
        refreshable: !credentials.refresh_token.is_empty(),
    }
}

/// Snapshot reported by `SessionManager::status`.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub expires_at: Option<DateTime<Utc>>,
    /// The endpoint requests would go to: the override if set, else the stored one.
    pub api_url: String,
}

/// Per-invocation settings for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Overrides the stored `api_url` for this invocation only; never persisted.
    pub api_url: Option<String>,
    pub callback_port: u16,
    pub login_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            callback_port: DEFAULT_CALLBACK_PORT,
            login_timeout: LOGIN_TIMEOUT,
        }
    }
}

/// Capability handed to API callers: a valid access token, refreshed if needed.
///
/// Uses `Pin<Box<dyn Future>>` so callers can hold an `Arc<dyn AccessTokenSource>`.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

pub struct SessionManager {
    store: CredentialStore,
    config: SessionConfig,
    http: reqwest::Client,
    on_authorize: Option<AuthorizeHandler>,
}

impl SessionManager {
    pub fn new(store: CredentialStore, config: SessionConfig) -> Result<Self> {
        Ok(Self {
            store,
            config,
            http: http_client()?,
            on_authorize: None,
        })
    }

    /// Replace the default browser opener used by `login`.
    pub fn with_authorize_handler(mut self, handler: AuthorizeHandler) -> Self {
        self.on_authorize = Some(handler);
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// True if either token is stored. Expiry is not checked and an
    /// unreadable record counts as logged out.
    pub async fn is_logged_in(&self) -> bool {
        match self.store.load().await {
            Ok(credentials) => credentials.has_tokens(),
            Err(e) => {
                warn!(error = %e, "could not read credentials");
                false
            }
        }
    }

    /// Full lifecycle evaluation, refreshing an expiring session once.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        self.authenticated_credentials().await.map(|_| ())
    }

    /// A usable access token, possibly freshly refreshed and persisted.
    pub async fn access_token(&self) -> Result<String> {
        Ok(self.authenticated_credentials().await?.access_token)
    }

    /// Report the session state without touching the network.
    pub async fn status(&self) -> Result<SessionStatus> {
        let credentials = self.store.load().await?;
        Ok(SessionStatus {
            state: classify(&credentials, Utc::now()),
            expires_at: credentials.expires_at,
            api_url: self.effective_api_url(&credentials),
        })
    }

    /// Interactive browser login. Refuses if tokens are already stored.
    ///
    /// A client registered during the flow is persisted together with the tokens.
    pub async fn login<F>(&self, cancel: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let credentials = self.store.load().await?;
        if credentials.has_tokens() {
            return Err(Error::AlreadyLoggedIn);
        }

        let mut flow = self
            .flow(&credentials)
            .with_callback_port(self.config.callback_port)
            .with_login_timeout(self.config.login_timeout);
        if let Some(handler) = &self.on_authorize {
            flow = flow.with_authorize_handler(handler.clone());
        }

        let result = flow.login(cancel).await?;

        if let Some(client) = &result.registered_client {
            self.store.save_client_credentials(client).await?;
        }
        self.store.save_tokens(&result.tokens, Utc::now()).await?;
        info!("login complete");
        Ok(())
    }

    /// Drop the tokens, keeping the client registration.
    pub async fn logout(&self) -> Result<()> {
        let credentials = self.store.load().await?;
        if !credentials.has_tokens() {
            return Err(Error::NotLoggedIn);
        }
        self.store.clear().await
    }

    async fn authenticated_credentials(&self) -> Result<Credentials> {
        let credentials = self.store.load().await?;
        match classify(&credentials, Utc::now()) {
            SessionState::LoggedOut => Err(Error::NotLoggedIn),
            SessionState::Valid => Ok(credentials),
            SessionState::Expired { refreshable: false } => Err(Error::SessionExpired),
            SessionState::Expired { refreshable: true } => self.refresh(&credentials).await,
        }
    }

    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials> {
        debug!(expires_at = ?credentials.expires_at, "access token expired, refreshing");
        let tokens = self
            .flow(credentials)
            .refresh_tokens(&credentials.refresh_token)
            .await
            .map_err(|e| {
                warn!(error = %e, "token refresh failed");
                Error::RefreshFailed(e.to_string())
            })?;

        let refreshed = self.store.save_tokens(&tokens, Utc::now()).await?;
        info!(expires_at = ?refreshed.expires_at, "token refreshed");
        Ok(refreshed)
    }

    fn flow(&self, credentials: &Credentials) -> OAuthFlow {
        OAuthFlow::new(self.effective_api_url(credentials), self.http.clone())
            .with_client_credentials(credentials.client_credentials())
    }

    fn effective_api_url(&self, credentials: &Credentials) -> String {
        self.config
            .api_url
            .clone()
            .unwrap_or_else(|| credentials.api_url.clone())
    }
}

impl AccessTokenSource for SessionManager {
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(SessionManager::access_token(self))
    }
}
