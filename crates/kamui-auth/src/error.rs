//! Error types for Kamui authentication

/// Errors from the OAuth flow, the credential store and the session manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("client registration failed: {message}")]
    Registration { status: u16, message: String },

    #[error("token exchange failed: {message}")]
    TokenExchange { status: u16, message: String },

    /// The token endpoint answered 401/403: the refresh token or client is no longer accepted.
    #[error("token rejected: {message}")]
    TokenRejected { status: u16, message: String },

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("invalid API URL {url}: {message}")]
    InvalidApiUrl { url: String, message: String },

    #[error("no available port for the OAuth callback in {start}..{end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("callback server error: {0}")]
    CallbackServer(String),

    #[error("state mismatch")]
    StateMismatch,

    #[error("OAuth error: {error} - {description}")]
    Provider { error: String, description: String },

    #[error("no authorization code received")]
    MissingCode,

    #[error("authentication timed out")]
    Timeout,

    #[error("authentication cancelled")]
    Cancelled,

    #[error("not logged in. Please run 'kamui login' first")]
    NotLoggedIn,

    #[error("session expired. Please run 'kamui login' again")]
    SessionExpired,

    #[error("failed to refresh token: {0}. Please run 'kamui login' again")]
    RefreshFailed(String),

    #[error("already logged in. Use 'kamui logout' first to log out")]
    AlreadyLoggedIn,

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_are_distinct() {
        let not_logged_in = Error::NotLoggedIn.to_string();
        let expired = Error::SessionExpired.to_string();
        assert_ne!(not_logged_in, expired);
        assert!(not_logged_in.contains("kamui login"));
        assert!(expired.contains("log") && expired.contains("again"));
    }

    #[test]
    fn refresh_failure_carries_cause_and_guidance() {
        let err = Error::RefreshFailed("token rejected: invalid_grant".into());
        let msg = err.to_string();
        assert!(msg.contains("invalid_grant"), "got: {msg}");
        assert!(msg.ends_with("Please run 'kamui login' again"), "got: {msg}");
    }

    #[test]
    fn provider_error_includes_code_and_description() {
        let err = Error::Provider {
            error: "access_denied".into(),
            description: "user declined".into(),
        };
        assert_eq!(err.to_string(), "OAuth error: access_denied - user declined");
    }

    #[test]
    fn timeout_message_is_stable() {
        assert_eq!(Error::Timeout.to_string(), "authentication timed out");
    }
}
