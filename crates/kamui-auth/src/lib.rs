//! Kamui Platform OAuth authentication library
//!
//! Dynamic client registration, the browser authorization-code flow with a
//! local loopback callback, token refresh, and the credential file. The CLI
//! binary depends on this crate; nothing here knows about argument parsing.
//!
//! Layers:
//! 1. `credentials::CredentialStore` persists the single credential record
//! 2. `flow::OAuthFlow` talks to the authorization server and never persists
//! 3. `session::SessionManager` decides valid / expired / refresh and writes results
//!
//! API callers only need `session::AccessTokenSource`.

pub mod authorize;
pub mod callback;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod session;
pub mod token;

#[cfg(test)]
mod test_support;

pub use constants::*;
pub use credentials::{CredentialStore, Credentials};
pub use error::{Error, Result};
pub use flow::{AuthorizeHandler, LoginResult, OAuthFlow};
pub use session::{AccessTokenSource, SessionConfig, SessionManager, SessionState, SessionStatus};
pub use token::{ClientCredentials, TokenResponse};
