//! OAuth authorization-code flow against one Kamui API endpoint
//!
//! Login sequence:
//! 1. Bind the first free callback port from the configured start
//! 2. Register a client for `http://localhost:<port>/callback` if none is known
//! 3. Generate the state nonce and start the callback listener
//! 4. Hand the authorization URL to the authorize handler (browser)
//! 5. Wait for the first of: code, callback error, cancellation, timeout
//! 6. Stop the listener, then exchange the code for tokens
//!
//! The flow never persists anything. A newly registered client is returned in
//! `LoginResult` for the caller to store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::authorize::{build_authorization_url, generate_state, redirect_uri};
use crate::callback::{
    CallbackReceivers, CallbackServer, build_callback_router, callback_channel,
    find_available_port,
};
use crate::constants::{DEFAULT_CALLBACK_PORT, HTTP_TIMEOUT, LOGIN_TIMEOUT};
use crate::error::{Error, Result};
use crate::token::{self, ClientCredentials, TokenResponse};

/// Called with the authorization URL once the callback listener is up.
pub type AuthorizeHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Tokens from a completed login, plus the client if this login registered one.
#[derive(Debug)]
pub struct LoginResult {
    pub tokens: TokenResponse,
    pub registered_client: Option<ClientCredentials>,
}

/// Default authorize handler: print the URL as a fallback and open the browser.
pub fn open_in_browser(url: &str) {
    println!("Opening browser for authentication...");
    println!("If the browser doesn't open, please visit:\n{url}\n");
    if let Err(e) = open::that_detached(url) {
        println!("Failed to open browser automatically: {e}");
    }
    println!("Waiting for authentication...");
}

/// Build the HTTP client used for registration, exchange and refresh.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::Http(format!("building HTTP client: {e}")))
}

pub struct OAuthFlow {
    api_url: String,
    client: Option<ClientCredentials>,
    callback_port: u16,
    login_timeout: Duration,
    http: reqwest::Client,
    on_authorize: AuthorizeHandler,
}

impl OAuthFlow {
    pub fn new(api_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            api_url: api_url.into(),
            client: None,
            callback_port: DEFAULT_CALLBACK_PORT,
            login_timeout: LOGIN_TIMEOUT,
            http,
            on_authorize: Arc::new(open_in_browser),
        }
    }

    /// Use an already registered client instead of registering during login.
    pub fn with_client_credentials(mut self, client: Option<ClientCredentials>) -> Self {
        self.client = client;
        self
    }

    /// First port of the callback port search.
    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn with_authorize_handler(mut self, handler: AuthorizeHandler) -> Self {
        self.on_authorize = handler;
        self
    }

    pub fn client_credentials(&self) -> Option<&ClientCredentials> {
        self.client.as_ref()
    }

    /// Dynamic client registration (RFC 7591) for `redirect_uri`.
    pub async fn register_client(&self, redirect_uri: &str) -> Result<ClientCredentials> {
        token::register_client(&self.http, &self.api_url, redirect_uri).await
    }

    /// Run the interactive login. `cancel` resolving aborts the wait for the callback.
    pub async fn login<F>(&mut self, cancel: F) -> Result<LoginResult>
    where
        F: Future<Output = ()>,
    {
        let listener = find_available_port(self.callback_port)?;
        let port = listener.port();
        let redirect_uri = redirect_uri(port);

        let mut registered_client = None;
        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                info!(api_url = %self.api_url, "registering CLI with Kamui Platform");
                // On failure `listener` drops here and the port is released
                let client = self.register_client(&redirect_uri).await?;
                self.client = Some(client.clone());
                registered_client = Some(client.clone());
                client
            }
        };

        let state = generate_state();
        let auth_url =
            build_authorization_url(&self.api_url, &client.client_id, &redirect_uri, &state)?;

        let (slots, receivers) = callback_channel(state);
        let server = CallbackServer::start(listener, build_callback_router(slots))?;
        debug!(port, "waiting for OAuth callback");

        (self.on_authorize)(&auth_url);

        let outcome = wait_for_callback(receivers, cancel, self.login_timeout).await;
        server.shutdown().await;
        let code = outcome?;

        info!("authorization code received, exchanging for tokens");
        let tokens =
            token::exchange_code(&self.http, &self.api_url, &client, &code, &redirect_uri).await?;

        Ok(LoginResult {
            tokens,
            registered_client,
        })
    }

    /// Exchange `refresh` for a new token set using the configured client.
    pub async fn refresh_tokens(&self, refresh: &str) -> Result<TokenResponse> {
        let client = self
            .client
            .clone()
            .unwrap_or_else(|| ClientCredentials::new(String::new(), String::new()));
        token::refresh_token(&self.http, &self.api_url, &client, refresh).await
    }
}

/// Whichever of code, error, cancellation or timeout happens first wins.
async fn wait_for_callback<F>(
    receivers: CallbackReceivers,
    cancel: F,
    timeout: Duration,
) -> Result<String>
where
    F: Future<Output = ()>,
{
    let CallbackReceivers { code, error } = receivers;
    tokio::select! {
        Ok(code) = code => Ok(code),
        Ok(error) = error => Err(error),
        () = cancel => Err(Error::Cancelled),
        () = tokio::time::sleep(timeout) => Err(Error::Timeout),
    }
}
