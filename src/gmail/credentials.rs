//! Credential store
//!
//! Reads the OAuth client secret file and persists the token set. Token
//! writes go to a temporary file in the same directory which is then renamed
//! over the target, so a crash mid-write never leaves a truncated token file.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{AuthError, GmailMcpError, Result};

/// Seconds before the real expiry at which a token is treated as expired
pub const EXPIRY_SKEW_SECS: i64 = 300;

/// OAuth client credentials
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,

    pub client_secret: String,

    /// Authorization endpoint
    pub auth_uri: String,

    /// Token endpoint
    pub token_uri: String,

    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Google wraps the credentials in either an "installed" or a "web" object
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    #[serde(alias = "web")]
    installed: Option<ClientSecret>,
}

/// Persisted OAuth token set
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Space separated granted scopes
    #[serde(default)]
    pub scope: String,

    /// Expiry timestamp (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Current time in Unix seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl TokenSet {
    /// Build a token set from a token endpoint response received at `now`
    pub fn issued(
        access_token: String,
        refresh_token: Option<String>,
        token_type: Option<String>,
        expires_in: Option<i64>,
        scope: Option<String>,
        now: i64,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: token_type.unwrap_or_else(default_token_type),
            scope: scope.unwrap_or_default(),
            expiry_date: expires_in.map(|secs| now + secs),
        }
    }

    /// Expired `EXPIRY_SKEW_SECS` before the real expiry. No expiry never expires.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.expiry_date {
            Some(expiry) => expiry - now < EXPIRY_SKEW_SECS,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token
            .as_deref()
            .map_or(false, |token| !token.is_empty())
    }

    /// Fold a refresh response into this set. The refresh token is kept when
    /// the server omits a new one and the scope only changes if returned.
    pub fn apply_refresh(&mut self, refreshed: TokenSet) {
        self.access_token = refreshed.access_token;
        self.token_type = refreshed.token_type;
        self.expiry_date = refreshed.expiry_date;
        if refreshed.refresh_token.is_some() {
            self.refresh_token = refreshed.refresh_token;
        }
        if !refreshed.scope.is_empty() {
            self.scope = refreshed.scope;
        }
    }
}

// Token values stay out of debug output.
impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expiry_date", &self.expiry_date)
            .finish()
    }
}

/// File-backed storage for the client secret and token set
#[derive(Debug, Clone)]
pub struct CredentialStore {
    client_secret_path: PathBuf,
    token_path: PathBuf,
}

impl CredentialStore {
    pub fn new(client_secret_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self {
            client_secret_path: client_secret_path.into(),
            token_path: token_path.into(),
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Load the OAuth client secret
    pub fn load_client_secret(&self) -> Result<ClientSecret> {
        let path = &self.client_secret_path;
        if !path.exists() {
            return Err(GmailMcpError::Auth(AuthError::KeysFileNotFound {
                path: path.display().to_string(),
            }));
        }

        let content = std::fs::read_to_string(path)?;
        let file: ClientSecretFile =
            serde_json::from_str(&content).map_err(|_| AuthError::InvalidKeysFormat)?;

        file.installed
            .ok_or_else(|| GmailMcpError::Auth(AuthError::InvalidKeysFormat))
    }

    /// Load the persisted token set, if any. An unreadable file counts as absent.
    pub fn load_tokens(&self) -> Option<TokenSet> {
        let content = match std::fs::read_to_string(&self.token_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.token_path.display(), "No stored tokens found");
                return None;
            }
            Err(e) => {
                warn!(path = %self.token_path.display(), error = %e, "Failed to read token file");
                return None;
            }
        };

        match serde_json::from_str::<TokenSet>(&content) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!(path = %self.token_path.display(), error = %e, "Failed to parse token file");
                None
            }
        }
    }

    /// Atomically replace the token file
    pub fn save_tokens(&self, tokens: &TokenSet) -> Result<()> {
        self.stage_tokens(tokens)?.commit()?;
        info!(path = %self.token_path.display(), "Saved OAuth tokens");
        Ok(())
    }

    /// Write the token set to a temporary sibling file without replacing the
    /// target. Dropping the returned value discards the write.
    pub fn stage_tokens(&self, tokens: &TokenSet) -> Result<StagedTokens> {
        let dir = match self.token_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }

        let mut file = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, tokens)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(StagedTokens {
            file,
            target: self.token_path.clone(),
        })
    }

    /// Delete the token file if present
    pub fn remove_tokens(&self) -> Result<()> {
        match std::fs::remove_file(&self.token_path) {
            Ok(()) => {
                info!(path = %self.token_path.display(), "Removed OAuth tokens");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A fully written token file waiting to be renamed over the target
pub struct StagedTokens {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedTokens {
    pub fn commit(self) -> Result<()> {
        self.file
            .persist(&self.target)
            .map_err(|e| GmailMcpError::Io(e.error))?;
        Ok(())
    }
}
