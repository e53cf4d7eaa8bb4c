//! Shared fixtures for unit tests: a temp config dir wired to a mock server

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wiremock::MockServer;

use crate::config::Config;
use crate::gmail::auth::Authenticator;
use crate::gmail::client::GmailClient;
use crate::gmail::credentials::{unix_now, CredentialStore, TokenSet};

pub(crate) const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

pub(crate) struct Fixture {
    _dir: TempDir,
    pub server: MockServer,
    pub config: Config,
}

impl Fixture {
    /// Keys file pointing at the mock token endpoint, plus optional stored tokens
    pub async fn start(tokens: Option<TokenSet>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;

        let mut config = Config::for_dir(dir.path());
        config.api_base_url = format!("{}/gmail/v1", server.uri());
        config.retry_backoff = Duration::from_millis(10);
        config.auth_timeout = Duration::from_secs(1);
        config.open_browser = false;
        config.oauth_callback_port = 0;

        let keys = serde_json::json!({
            "installed": {
                "client_id": "test-client-id",
                "client_secret": "test-client-secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": format!("{}/token", server.uri()),
                "redirect_uris": ["http://localhost"]
            }
        });
        std::fs::write(&config.oauth_path, keys.to_string()).unwrap();

        let fixture = Self {
            _dir: dir,
            server,
            config,
        };
        if let Some(tokens) = tokens {
            fixture.store().save_tokens(&tokens).unwrap();
        }
        fixture
    }

    pub fn store(&self) -> CredentialStore {
        CredentialStore::new(&self.config.oauth_path, &self.config.token_path)
    }

    pub fn authenticator(&self) -> Arc<Authenticator> {
        Arc::new(Authenticator::new(self.config.clone()).unwrap())
    }

    pub fn client(&self) -> GmailClient {
        GmailClient::new(self.authenticator())
    }
}

pub(crate) fn valid_tokens() -> TokenSet {
    TokenSet {
        access_token: "valid-access".to_string(),
        refresh_token: Some("refresh-token".to_string()),
        token_type: "Bearer".to_string(),
        scope: MODIFY_SCOPE.to_string(),
        expiry_date: Some(unix_now() + 3600),
    }
}

pub(crate) fn expired_tokens() -> TokenSet {
    TokenSet {
        access_token: "stale-access".to_string(),
        expiry_date: Some(unix_now() - 60),
        ..valid_tokens()
    }
}

/// A message as returned with `format=metadata`
pub(crate) fn metadata_message(id: &str, subject: &str, unread: bool) -> serde_json::Value {
    let mut labels = vec!["INBOX"];
    if unread {
        labels.push("UNREAD");
    }
    serde_json::json!({
        "id": id,
        "threadId": format!("thread-{}", id),
        "labelIds": labels,
        "snippet": format!("About {}", subject),
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                {"name": "From", "value": "Ann <ann@example.com>"},
                {"name": "To", "value": "me@example.com"},
                {"name": "Subject", "value": subject},
                {"name": "Date", "value": "Mon, 5 Oct 2026 09:00:00 +0000"}
            ]
        }
    })
}
