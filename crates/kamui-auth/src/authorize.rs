//! Authorization request construction
//!
//! The `state` parameter binds one browser round trip to one callback
//! listener: the listener only accepts a redirect carrying the exact nonce it
//! was started with.

use rand::RngExt;

use crate::constants::{AUTHORIZE_PATH, CALLBACK_PATH, SCOPE};
use crate::error::{Error, Result};

/// Generate a single-use CSRF nonce: 16 random bytes, hex encoded.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Redirect URI served by the local callback listener on `port`.
pub fn redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}{CALLBACK_PATH}")
}

/// Build the browser URL for the authorization endpoint under `api_url`.
pub fn build_authorization_url(
    api_url: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<String> {
    let base = format!("{}{}", api_url.trim_end_matches('/'), AUTHORIZE_PATH);
    let url = reqwest::Url::parse_with_params(
        &base,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", SCOPE),
            ("state", state),
        ],
    )
    .map_err(|e| Error::InvalidApiUrl {
        url: api_url.to_string(),
        message: e.to_string(),
    })?;
    Ok(url.into())
}
