//! Configuration management for the Gmail MCP adapter
//!
//! Handles paths, environment variables, and configuration loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, GmailMcpError, Result};

const DEFAULT_CALLBACK_PORT: u16 = 3000;
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

/// Configuration for the Gmail MCP adapter
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing configuration files
    pub config_dir: PathBuf,

    /// Path to the OAuth client secret file
    pub oauth_path: PathBuf,

    /// Path to the persisted token set
    pub token_path: PathBuf,

    /// Port for the local OAuth redirect listener (0 picks a free port)
    pub oauth_callback_port: u16,

    /// Gmail REST base URL
    pub api_base_url: String,

    /// How long the interactive consent flow may wait for the redirect
    pub auth_timeout: Duration,

    /// Fixed delay before the single retry of a rate-limited or transient failure
    pub retry_backoff: Duration,

    /// Whether the consent flow should try to open a browser
    pub open_browser: bool,

    /// Gmail API scopes
    pub scopes: Vec<String>,
}

impl Config {
    /// Create a new configuration from the environment with default paths
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var("GMAIL_MCP_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => Self::default_config_dir()?,
        };
        Self::ensure_dir(&config_dir)?;

        let mut config = Self::for_dir(&config_dir);

        if let Ok(path) = std::env::var("GMAIL_OAUTH_PATH") {
            config.oauth_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GMAIL_TOKEN_PATH") {
            config.token_path = PathBuf::from(path);
        }
        if let Some(port) = env_parse::<u16>("GMAIL_OAUTH_PORT")? {
            config.oauth_callback_port = port;
        }
        if let Ok(url) = std::env::var("GMAIL_API_BASE_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = env_parse::<u64>("GMAIL_AUTH_TIMEOUT_SECS")? {
            config.auth_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("GMAIL_RETRY_BACKOFF_MS")? {
            config.retry_backoff = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Deterministic configuration rooted at `dir`, ignoring the environment
    pub fn for_dir(dir: impl AsRef<Path>) -> Self {
        let config_dir = dir.as_ref().to_path_buf();
        Self {
            oauth_path: config_dir.join("gcp-oauth.keys.json"),
            token_path: config_dir.join("token.json"),
            config_dir,
            oauth_callback_port: DEFAULT_CALLBACK_PORT,
            api_base_url: gmail::API_BASE_URL.to_string(),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            open_browser: true,
            scopes: gmail::SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn default_config_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| {
                GmailMcpError::Config(ConfigError::DirNotFound {
                    path: "~".to_string(),
                })
            })?
            .join(".gmail-mcp"))
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|_| {
                GmailMcpError::Config(ConfigError::DirCreationFailed {
                    path: dir.display().to_string(),
                })
            })?;
        }
        Ok(())
    }

    /// Check if the OAuth client secret file exists
    pub fn oauth_keys_exist(&self) -> bool {
        self.oauth_path.exists()
    }

    /// Try to find OAuth keys in current directory and copy to config dir
    pub fn find_and_copy_oauth_keys(&self) -> Result<bool> {
        let local_oauth = std::env::current_dir()
            .map_err(GmailMcpError::Io)?
            .join("gcp-oauth.keys.json");

        if local_oauth.exists() && !self.oauth_keys_exist() {
            std::fs::copy(&local_oauth, &self.oauth_path).map_err(GmailMcpError::Io)?;
            return Ok(true);
        }

        Ok(false)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            GmailMcpError::Config(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                value,
            })
        }),
        Err(_) => Ok(None),
    }
}

/// Gmail API constants
pub mod gmail {
    /// Base URL for Gmail API
    pub const API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

    /// User ID for the authenticated user
    pub const USER_ID: &str = "me";

    /// Upper bound on identifiers accepted by one batch call
    pub const MAX_BATCH_IDS: usize = 1000;

    pub const SCOPES: &[&str] = &[
        "https://www.googleapis.com/auth/gmail.modify",
        "https://www.googleapis.com/auth/gmail.compose",
        "https://www.googleapis.com/auth/gmail.send",
        "https://www.googleapis.com/auth/gmail.labels",
        "https://www.googleapis.com/auth/gmail.readonly",
    ];

    /// System label IDs
    pub mod labels {
        pub const INBOX: &str = "INBOX";
        pub const SENT: &str = "SENT";
        pub const TRASH: &str = "TRASH";
        pub const SPAM: &str = "SPAM";
        pub const STARRED: &str = "STARRED";
        pub const IMPORTANT: &str = "IMPORTANT";
        pub const UNREAD: &str = "UNREAD";
        pub const DRAFT: &str = "DRAFT";

        pub const SYSTEM: &[&str] = &[INBOX, SENT, TRASH, SPAM, STARRED, IMPORTANT, UNREAD, DRAFT];
    }
}
