//! Credential storage for the signed-in user
//!
//! One JSON record per machine user holds the OAuth tokens, their expiry, the
//! API endpoint and the dynamically registered client. Every helper reloads
//! the file so callers never act on a stale copy. Writes go through a temp
//! file and a rename, with 0600 permissions since the record contains tokens.
//!
//! There is no file locking: two CLI processes refreshing at the same time
//! both write, and the last rename wins.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::constants::DEFAULT_API_URL;
use crate::error::{Error, Result};
use crate::token::{ClientCredentials, TokenResponse, redact};

/// The persisted credential record.
///
/// Empty strings mean "absent"; they are omitted from the file. `expires_at`
/// of `None` means the access token never expires as far as the CLI knows.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_expiry"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
}

impl Credentials {
    /// True if either token is present. Expiry is not checked.
    pub fn has_tokens(&self) -> bool {
        !self.access_token.is_empty() || !self.refresh_token.is_empty()
    }

    /// The registered OAuth client, if registration has happened.
    pub fn client_credentials(&self) -> Option<ClientCredentials> {
        if self.client_id.is_empty() {
            return None;
        }
        Some(ClientCredentials::new(
            self.client_id.clone(),
            self.client_secret.clone(),
        ))
    }

    /// Blank the token fields, keeping the client registration and endpoint.
    pub fn clear_tokens(&mut self) {
        self.access_token.clear();
        self.refresh_token.clear();
        self.expires_at = None;
    }

    /// Adopt a token endpoint response received at `now`.
    ///
    /// The expiry is `now + expires_in` when `expires_in` is positive and
    /// representable, and cleared otherwise. A response without a refresh token keeps the
    /// previous one.
    pub fn apply_tokens(&mut self, tokens: &TokenResponse, now: DateTime<Utc>) {
        self.access_token = tokens.access_token.clone();
        if !tokens.refresh_token.is_empty() {
            self.refresh_token = tokens.refresh_token.clone();
        }
        // A lifetime past chrono's range is as good as none
        self.expires_at = if tokens.expires_in > 0 {
            TimeDelta::try_seconds(tokens.expires_in).and_then(|d| now.checked_add_signed(d))
        } else {
            None
        };
    }

    fn fill_defaults(&mut self) {
        if self.api_url.is_empty() {
            self.api_url = DEFAULT_API_URL.to_string();
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("api_url", &self.api_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .finish()
    }
}

/// Unix seconds of `0001-01-01T00:00:00Z`, the zero time older records use for "no expiry".
const ZERO_TIME_UNIX: i64 = -62_135_596_800;

fn deserialize_expiry<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|at| at.timestamp() != ZERO_TIME_UNIX))
}

/// File-backed store for the single credential record.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record. A missing file is an empty record with the default API URL.
    pub async fn load(&self) -> Result<Credentials> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no credential file, using empty record");
                let mut credentials = Credentials::default();
                credentials.fill_defaults();
                return Ok(credentials);
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "reading credential file {}: {e}",
                    self.path.display()
                )));
            }
        };

        let mut credentials: Credentials = serde_json::from_str(&contents).map_err(|e| {
            Error::CredentialParse(format!("parsing {}: {e}", self.path.display()))
        })?;
        credentials.fill_defaults();
        Ok(credentials)
    }

    /// Persist the record, creating the parent directory (0700) if needed.
    pub async fn save(&self, credentials: &Credentials) -> Result<()> {
        write_atomic(&self.path, credentials).await
    }

    /// Log out locally: blank the tokens, keep the client registration.
    pub async fn clear(&self) -> Result<()> {
        let mut credentials = self.load().await?;
        credentials.clear_tokens();
        self.save(&credentials).await?;
        info!(path = %self.path.display(), "cleared stored tokens");
        Ok(())
    }

    /// Remove the file entirely. Removing a file that does not exist succeeds.
    pub async fn delete(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "deleted credential file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!(
                "removing credential file {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// The stored access token, without any expiry check.
    pub async fn access_token(&self) -> Result<Option<String>> {
        let credentials = self.load().await?;
        Ok(Some(credentials.access_token).filter(|t| !t.is_empty()))
    }

    pub async fn api_url(&self) -> Result<String> {
        Ok(self.load().await?.api_url)
    }

    pub async fn client_credentials(&self) -> Result<Option<ClientCredentials>> {
        Ok(self.load().await?.client_credentials())
    }

    pub async fn save_client_credentials(&self, client: &ClientCredentials) -> Result<()> {
        let mut credentials = self.load().await?;
        credentials.client_id = client.client_id.clone();
        credentials.client_secret = client.client_secret.expose().clone();
        self.save(&credentials).await?;
        debug!(client_id = %client.client_id, "stored client registration");
        Ok(())
    }

    /// Store a token endpoint response received at `now` and return the updated record.
    pub async fn save_tokens(
        &self,
        tokens: &TokenResponse,
        now: DateTime<Utc>,
    ) -> Result<Credentials> {
        let mut credentials = self.load().await?;
        credentials.apply_tokens(tokens, now);
        self.save(&credentials).await?;
        debug!(expires_at = ?credentials.expires_at, "stored tokens");
        Ok(credentials)
    }
}

/// Write the record through a temp file in the same directory, then rename
/// it over the target. The temp file is created 0600 before any bytes land.
async fn write_atomic(path: &Path, credentials: &Credentials) -> Result<()> {
    let json = serde_json::to_string_pretty(credentials)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .map_err(|e| Error::Io(format!("creating config directory {}: {e}", dir.display())))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    if let Err(e) = write_and_rename(&tmp_path, path, json.as_bytes()).await {
        match tokio::fs::remove_file(&tmp_path).await {
            Err(cleanup) if cleanup.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %tmp_path.display(), error = %cleanup, "could not remove temp file");
            }
            _ => {}
        }
        return Err(e);
    }

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

async fn write_and_rename(tmp_path: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(tmp_path)
        .await
        .map_err(|e| Error::Io(format!("creating temp credential file: {e}")))?;
    file.write_all(contents)
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Io(format!("syncing temp credential file: {e}")))?;
    drop(file);

    // A temp file left by a crashed run keeps its old mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(tmp_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))
}
