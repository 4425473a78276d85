//! Argument parsing and command handlers
//!
//! Global flags may appear before or after the command:
//! `--config <path>`, `--api-url <url>`, `--log-json`. Both `--flag value`
//! and `--flag=value` are accepted.

use std::future::Future;
use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kamui_auth::{SessionManager, SessionState, SessionStatus};

use crate::error::UsageError;

pub const USAGE: &str = "\
Usage: kamui [OPTIONS] <COMMAND>

Commands:
  login     Log in to Kamui Platform through the browser
  logout    Remove stored tokens
  status    Show the current session without contacting the server
  token     Print a valid access token, refreshing it if needed
  version   Print the version
  help      Print this message

Options:
  --config <PATH>    Credential file (default: ~/.kamui/config.json, env: KAMUI_CONFIG)
  --api-url <URL>    API endpoint for this invocation (env: KAMUI_API_URL)
  --log-json         Emit logs as JSON on stderr
  -h, --help         Print this message
  -V, --version      Print the version";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Login,
    Logout,
    Status,
    Token,
    Version,
    Help,
}

impl Command {
    fn parse(name: &str) -> std::result::Result<Self, UsageError> {
        match name {
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            "status" => Ok(Self::Status),
            "token" => Ok(Self::Token),
            "version" => Ok(Self::Version),
            "help" => Ok(Self::Help),
            other => Err(UsageError::UnknownCommand(other.to_string())),
        }
    }
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub command: Command,
    pub config: Option<String>,
    pub api_url: Option<String>,
    pub log_json: bool,
}

/// Parse arguments, excluding the program name. No command means help.
pub fn parse_args<I>(args: I) -> std::result::Result<Args, UsageError>
where
    I: IntoIterator<Item = String>,
{
    let mut command = None;
    let mut config = None;
    let mut api_url = None;
    let mut log_json = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => {
                (flag.to_string(), Some(value.to_string()))
            }
            _ => (arg.clone(), None),
        };

        match flag.as_str() {
            "--config" | "--api-url" => {
                let value = match inline {
                    Some(value) => value,
                    None => args
                        .next()
                        .ok_or_else(|| UsageError::MissingValue(flag.clone()))?,
                };
                if flag == "--config" {
                    config = Some(value);
                } else {
                    api_url = Some(value);
                }
            }
            "--log-json" => log_json = true,
            "-h" | "--help" => command = Some(Command::Help),
            "-V" | "--version" => command = Some(Command::Version),
            f if f.starts_with('-') => return Err(UsageError::UnknownFlag(arg)),
            name => {
                if command.is_some() {
                    return Err(UsageError::UnexpectedArgument(name.to_string()));
                }
                command = Some(Command::parse(name)?);
            }
        }
    }

    Ok(Args {
        command: command.unwrap_or(Command::Help),
        config,
        api_url,
        log_json,
    })
}

/// `kamui login`: browser flow, cancelled when `cancel` resolves.
pub async fn login<F>(manager: &SessionManager, cancel: F, out: &mut impl Write) -> Result<()>
where
    F: Future<Output = ()>,
{
    match manager.login(cancel).await {
        Ok(()) => {}
        Err(e @ kamui_auth::Error::AlreadyLoggedIn) => return Err(e.into()),
        Err(e) => return Err(anyhow::Error::new(e).context("authentication failed")),
    }
    writeln!(out, "✓ Successfully logged in to Kamui Platform!")?;
    Ok(())
}

/// `kamui logout`: clear tokens, keep the client registration.
pub async fn logout(manager: &SessionManager, out: &mut impl Write) -> Result<()> {
    manager.logout().await?;
    writeln!(out, "✓ Successfully logged out from Kamui Platform!")?;
    Ok(())
}

/// `kamui status`: report the stored session; no network calls.
pub async fn status(manager: &SessionManager, out: &mut impl Write) -> Result<()> {
    let status = manager
        .status()
        .await
        .context("failed to read credentials")?;
    writeln!(out, "{}", format_status(&status))?;
    Ok(())
}

/// `kamui token`: print a usable access token on stdout.
pub async fn token(manager: &SessionManager, out: &mut impl Write) -> Result<()> {
    let token = manager.access_token().await?;
    writeln!(out, "{token}")?;
    Ok(())
}

pub fn format_status(status: &SessionStatus) -> String {
    match status.state {
        SessionState::LoggedOut => {
            "Not logged in. Run 'kamui login' to authenticate.".to_string()
        }
        SessionState::Valid => format!(
            "Logged in to {}\nToken expires: {}",
            status.api_url,
            format_expiry(status.expires_at)
        ),
        SessionState::Expired { refreshable: true } => format!(
            "Logged in to {}\nToken expired: {} (will be refreshed on next use)",
            status.api_url,
            format_expiry(status.expires_at)
        ),
        SessionState::Expired { refreshable: false } => format!(
            "Session expired for {}. Run 'kamui login' again.",
            status.api_url
        ),
    }
}

fn format_expiry(expires_at: Option<DateTime<Utc>>) -> String {
    match expires_at {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kamui_auth::{CredentialStore, Credentials, SessionConfig};

    fn args(list: &[&str]) -> std::result::Result<Args, UsageError> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    async fn manager_with(
        dir: &tempfile::TempDir,
        credentials: Option<Credentials>,
    ) -> SessionManager {
        let store = CredentialStore::new(dir.path().join("config.json"));
        if let Some(credentials) = credentials {
            store.save(&credentials).await.unwrap();
        }
        SessionManager::new(store, SessionConfig::default()).unwrap()
    }

    fn logged_in() -> Credentials {
        Credentials {
            access_token: "tok_live".into(),
            refresh_token: "rt".into(),
            expires_at: None,
            api_url: "https://api.example.test".into(),
            client_id: "cli_1".into(),
            client_secret: "cs_1".into(),
        }
    }

    // --- parse_args ---

    #[test]
    fn no_arguments_means_help() {
        assert_eq!(args(&[]).unwrap().command, Command::Help);
    }

    #[test]
    fn flags_before_and_after_command() {
        let parsed = args(&[
            "--config",
            "/tmp/c.json",
            "login",
            "--api-url=http://localhost:3000",
        ])
        .unwrap();
        assert_eq!(parsed.command, Command::Login);
        assert_eq!(parsed.config.as_deref(), Some("/tmp/c.json"));
        assert_eq!(parsed.api_url.as_deref(), Some("http://localhost:3000"));
        assert!(!parsed.log_json);
    }

    #[test]
    fn version_and_help_flags() {
        assert_eq!(args(&["-V"]).unwrap().command, Command::Version);
        assert_eq!(args(&["status", "--help"]).unwrap().command, Command::Help);
        assert!(args(&["--log-json", "token"]).unwrap().log_json);
    }

    #[test]
    fn usage_errors() {
        assert_eq!(
            args(&["deploy"]).unwrap_err(),
            UsageError::UnknownCommand("deploy".into())
        );
        assert_eq!(
            args(&["login", "--config"]).unwrap_err(),
            UsageError::MissingValue("--config".into())
        );
        assert_eq!(
            args(&["--verbose"]).unwrap_err(),
            UsageError::UnknownFlag("--verbose".into())
        );
        assert_eq!(
            args(&["login", "logout"]).unwrap_err(),
            UsageError::UnexpectedArgument("logout".into())
        );
    }

    // --- format_status ---

    #[test]
    fn status_lines_per_state() {
        let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let mut status = SessionStatus {
            state: SessionState::LoggedOut,
            expires_at: None,
            api_url: "https://api.example.test".into(),
        };
        assert!(format_status(&status).contains("kamui login"));

        status.state = SessionState::Valid;
        assert_eq!(
            format_status(&status),
            "Logged in to https://api.example.test\nToken expires: never"
        );

        status.expires_at = Some(at);
        status.state = SessionState::Expired { refreshable: true };
        let text = format_status(&status);
        assert!(text.contains("2030-01-02 03:04:05 UTC"), "got: {text}");
        assert!(text.contains("refreshed"), "got: {text}");

        status.state = SessionState::Expired { refreshable: false };
        assert!(format_status(&status).contains("login' again"));
    }

    // --- handlers ---

    #[tokio::test]
    async fn token_prints_stored_token() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(&dir, Some(logged_in())).await;
        let mut out = Vec::new();

        token(&manager, &mut out).await.unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "tok_live\n");
    }

    #[tokio::test]
    async fn token_when_logged_out_fails_with_guidance() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(&dir, None).await;
        let mut out = Vec::new();

        let err = token(&manager, &mut out).await.unwrap_err();

        assert!(format!("{err:#}").contains("kamui login"), "got: {err:#}");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn logout_prints_success_and_second_logout_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(&dir, Some(logged_in())).await;
        let mut out = Vec::new();

        logout(&manager, &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Successfully logged out"));

        let err = logout(&manager, &mut Vec::new()).await.unwrap_err();
        assert!(format!("{err:#}").starts_with("not logged in"), "got: {err:#}");
    }

    #[tokio::test]
    async fn login_when_logged_in_is_not_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(&dir, Some(logged_in())).await;

        let err = login(&manager, std::future::pending(), &mut Vec::new())
            .await
            .unwrap_err();

        assert_eq!(
            format!("{err:#}"),
            "already logged in. Use 'kamui logout' first to log out"
        );
    }

    #[tokio::test]
    async fn status_reads_store() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(&dir, Some(logged_in())).await;
        let mut out = Vec::new();

        status(&manager, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Logged in to https://api.example.test"), "got: {text}");
    }
}
