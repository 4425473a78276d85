//! Invocation configuration
//!
//! Credential file precedence: `--config` > `KAMUI_CONFIG` > `~/.kamui/config.json`.
//! API URL override precedence: `--api-url` > `KAMUI_API_URL`. The override
//! applies to this invocation only and is never written to the credential file.

use std::path::PathBuf;

use kamui_auth::SessionConfig;

pub const CONFIG_ENV: &str = "KAMUI_CONFIG";
pub const API_URL_ENV: &str = "KAMUI_API_URL";

/// Resolved settings for one `kamui` run.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub credentials_path: PathBuf,
    pub api_url: Option<String>,
}

impl CliConfig {
    pub fn resolve(cli_path: Option<&str>, cli_api_url: Option<&str>) -> common::Result<Self> {
        Ok(Self {
            credentials_path: resolve_path(cli_path, dirs::home_dir())?,
            api_url: resolve_api_url(cli_api_url)?,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            api_url: self.api_url.clone(),
            ..SessionConfig::default()
        }
    }
}

/// Resolve the credential file path. `home` is only consulted as the last resort.
pub fn resolve_path(cli_path: Option<&str>, home: Option<PathBuf>) -> common::Result<PathBuf> {
    if let Some(p) = cli_path {
        return Ok(PathBuf::from(p));
    }
    if let Some(p) = env_value(CONFIG_ENV) {
        return Ok(PathBuf::from(p));
    }
    home.map(|h| h.join(".kamui").join("config.json"))
        .ok_or(common::Error::HomeDirNotFound)
}

/// Resolve and validate the API URL override, if any.
pub fn resolve_api_url(cli_api_url: Option<&str>) -> common::Result<Option<String>> {
    let Some(url) = cli_api_url.map(str::to_owned).or_else(|| env_value(API_URL_ENV)) else {
        return Ok(None);
    };

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "api url must start with http:// or https://, got: {url}"
        )));
    }
    Ok(Some(url.trim_end_matches('/').to_owned()))
}

/// An unset or empty variable both count as absent.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
