//! Registration and token endpoint calls
//!
//! Three interactions with the Kamui authorization server:
//! 1. Dynamic client registration (`POST /oauth/register`, JSON)
//! 2. Authorization code exchange (`POST /oauth/token`, form)
//! 3. Token refresh (`POST /oauth/token`, form)
//!
//! None of these retry. Error bodies of the form `{"message": "..."}` are
//! surfaced verbatim; anything else becomes `status N`.

use std::fmt;

use common::Secret;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{CLIENT_NAME, GRANT_TYPES, REGISTER_PATH, SCOPE, TOKEN_PATH};
use crate::error::{Error, Result};

/// OAuth client issued by dynamic registration.
///
/// The secret may be empty for public clients; it is then left out of token requests.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl ClientCredentials {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret: Secret::new(client_secret),
        }
    }
}

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds; zero or negative means the server
/// did not state a lifetime.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub scope: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &redact(&self.access_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &redact(&self.refresh_token))
            .field("scope", &self.scope)
            .finish()
    }
}

/// Debug placeholder for a token or secret; empty stays visibly empty.
pub(crate) fn redact(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "[REDACTED]" }
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    client_name: &'a str,
    redirect_uris: [&'a str; 1],
    grant_types: [&'a str; 2],
    scope: &'a str,
}

#[derive(Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Extract a human-readable message from an error response body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.message.is_empty() => parsed.message,
        _ => format!("status {}", status.as_u16()),
    }
}

fn endpoint(api_url: &str, path: &str) -> String {
    format!("{}{}", api_url.trim_end_matches('/'), path)
}

/// Register this CLI as an OAuth client for `redirect_uri`.
///
/// Only 200 and 201 count as success.
pub async fn register_client(
    http: &reqwest::Client,
    api_url: &str,
    redirect_uri: &str,
) -> Result<ClientCredentials> {
    let url = endpoint(api_url, REGISTER_PATH);
    let body = RegistrationRequest {
        client_name: CLIENT_NAME,
        redirect_uris: [redirect_uri],
        grant_types: GRANT_TYPES,
        scope: SCOPE,
    };

    let response = http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("registration request failed: {e}")))?;

    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::CREATED {
        let text = response.text().await.unwrap_or_default();
        return Err(Error::Registration {
            status: status.as_u16(),
            message: error_message(status, &text),
        });
    }

    let registered = response
        .json::<RegistrationResponse>()
        .await
        .map_err(|e| Error::InvalidResponse {
            endpoint: REGISTER_PATH.into(),
            message: e.to_string(),
        })?;

    debug!(client_id = %registered.client_id, "registered OAuth client");
    Ok(ClientCredentials::new(
        registered.client_id,
        registered.client_secret,
    ))
}

/// Exchange an authorization code for tokens.
///
/// `redirect_uri` must be the exact URI the code was issued for.
pub async fn exchange_code(
    http: &reqwest::Client,
    api_url: &str,
    client: &ClientCredentials,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client.client_id.as_str()),
    ];
    if !client.client_secret.is_empty() {
        form.push(("client_secret", client.client_secret.expose().as_str()));
    }

    let response = http
        .post(endpoint(api_url, TOKEN_PATH))
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if status != StatusCode::OK {
        let text = response.text().await.unwrap_or_default();
        return Err(Error::TokenExchange {
            status: status.as_u16(),
            message: error_message(status, &text),
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse {
            endpoint: TOKEN_PATH.into(),
            message: e.to_string(),
        })
}

/// Exchange a refresh token for a fresh token set.
///
/// 401/403 map to `TokenRejected` (the grant is dead); other failures to `TokenExchange`.
pub async fn refresh_token(
    http: &reqwest::Client,
    api_url: &str,
    client: &ClientCredentials,
    refresh: &str,
) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", client.client_id.as_str()),
    ];
    if !client.client_secret.is_empty() {
        form.push(("client_secret", client.client_secret.expose().as_str()));
    }

    let response = http
        .post(endpoint(api_url, TOKEN_PATH))
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if status != StatusCode::OK {
        let text = response.text().await.unwrap_or_default();
        let message = error_message(status, &text);
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::TokenRejected {
                status: status.as_u16(),
                message,
            });
        }
        return Err(Error::TokenExchange {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse {
            endpoint: TOKEN_PATH.into(),
            message: e.to_string(),
        })
}
