//! Kamui OAuth constants
//!
//! Endpoint paths are relative to the configured API base URL. The client
//! credentials themselves come from dynamic registration and live in the
//! credential store, never here.

use std::time::Duration;

/// Default Kamui API endpoint, used when the credential record has no `api_url`
pub const DEFAULT_API_URL: &str = "https://api.kamui-platform.com";

/// Dynamic client registration endpoint (RFC 7591)
pub const REGISTER_PATH: &str = "/oauth/register";

/// Browser-facing authorization endpoint
pub const AUTHORIZE_PATH: &str = "/oauth/authorize";

/// Token endpoint for code exchange and refresh
pub const TOKEN_PATH: &str = "/oauth/token";

/// Path served by the local callback listener
pub const CALLBACK_PATH: &str = "/callback";

/// First port tried for the local callback listener
pub const DEFAULT_CALLBACK_PORT: u16 = 9876;

/// Number of consecutive ports tried, starting at the callback port
pub const CALLBACK_PORT_RANGE: u16 = 10;

/// Display name sent during dynamic client registration
pub const CLIENT_NAME: &str = "Kamui CLI";

/// The platform issues a single scope covering every API
pub const SCOPE: &str = "full";

/// Grant types declared at registration
pub const GRANT_TYPES: [&str; 2] = ["authorization_code", "refresh_token"];

/// Per-request timeout for registration, exchange and refresh calls
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `login` waits for the browser to hit the callback
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Access tokens expiring within this window are treated as expired
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(60);
