//! OAuth authentication for Gmail API
//!
//! Handles the OAuth 2.0 lifecycle:
//! - Loading client credentials and persisted tokens
//! - Interactive browser-based authorization
//! - Transparent refresh before expiry and after a rejected token

use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AuthError, GmailApiError, GmailMcpError, Result};
use crate::gmail::callback::CallbackListener;
use crate::gmail::credentials::{unix_now, ClientSecret, CredentialStore, TokenSet};

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoCredentials,
    Authorizing,
    Authorized,
    Expired,
    Revoked,
}

/// Credentials for a single API call
#[derive(Clone)]
pub struct AuthorizedSession {
    pub access_token: String,
    pub token_type: String,
    pub expiry_date: Option<i64>,
    pub scopes: Vec<String>,
}

impl AuthorizedSession {
    fn from_tokens(tokens: &TokenSet) -> Self {
        Self {
            access_token: tokens.access_token.clone(),
            token_type: tokens.token_type.clone(),
            expiry_date: tokens.expiry_date,
            scopes: tokens.scope.split_whitespace().map(String::from).collect(),
        }
    }
}

impl std::fmt::Debug for AuthorizedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedSession")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expiry_date", &self.expiry_date)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Token response from OAuth token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self, now: i64) -> TokenSet {
        TokenSet::issued(
            self.access_token,
            self.refresh_token,
            self.token_type,
            self.expires_in,
            self.scope,
            now,
        )
    }
}

/// Error body from OAuth token endpoint
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

struct Session {
    tokens: Option<TokenSet>,
    state: SessionState,
}

fn resting_state(tokens: &Option<TokenSet>) -> SessionState {
    match tokens {
        None => SessionState::NoCredentials,
        Some(tokens) if tokens.is_expired() => SessionState::Expired,
        Some(_) => SessionState::Authorized,
    }
}

/// Only `invalid_grant` means the refresh token itself is dead. Other
/// rejections, such as `invalid_client` from a broken secret file, leave the
/// stored tokens alone.
fn refresh_rejection(code: &str, reason: String) -> AuthError {
    if code == "invalid_grant" {
        AuthError::Revoked { reason }
    } else {
        AuthError::TokenRefreshFailed { message: reason }
    }
}

/// OAuth authenticator
///
/// Owns the token set. All reads and refreshes go through one lock so a
/// refresh is never performed twice concurrently.
pub struct Authenticator {
    config: Config,

    http_client: reqwest::Client,

    client_secret: ClientSecret,

    store: CredentialStore,

    session: Mutex<Session>,
}

impl Authenticator {
    /// Create a new authenticator from the configured paths
    pub fn new(config: Config) -> Result<Self> {
        let store = CredentialStore::new(&config.oauth_path, &config.token_path);
        let client_secret = store.load_client_secret()?;

        let tokens = store.load_tokens();
        let state = resting_state(&tokens);
        info!(?state, "Loaded OAuth session");

        Ok(Self {
            config,
            http_client: reqwest::Client::new(),
            client_secret,
            store,
            session: Mutex::new(Session { tokens, state }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state
    }

    /// Current session without user interaction. Refreshes an expired token
    /// but never starts the consent flow.
    pub async fn session(&self) -> Result<AuthorizedSession> {
        let mut session = self.session.lock().await;

        if session.state == SessionState::Revoked {
            return Err(GmailMcpError::Auth(AuthError::Revoked {
                reason: "refresh token no longer valid".to_string(),
            }));
        }

        let tokens = session.tokens.as_ref().ok_or_else(|| {
            GmailMcpError::Auth(AuthError::CredentialsNotFound {
                path: self.store.token_path().display().to_string(),
            })
        })?;

        if !tokens.is_expired() {
            let current = AuthorizedSession::from_tokens(tokens);
            session.state = SessionState::Authorized;
            return Ok(current);
        }

        session.state = SessionState::Expired;
        self.refresh_locked(&mut session).await
    }

    /// A valid session, running the interactive flow when stored credentials
    /// are missing or unusable.
    pub async fn ensure_session(&self) -> Result<AuthorizedSession> {
        match self.session().await {
            Ok(session) => return Ok(session),
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => info!(error = %e, "Stored credentials unusable, starting authorization"),
        }
        self.authenticate_interactive().await
    }

    /// Force one refresh after the API rejected `rejected`. If another call
    /// already replaced that token the current one is returned instead.
    pub async fn refresh_after_rejection(
        &self,
        rejected: &AuthorizedSession,
    ) -> Result<AuthorizedSession> {
        let mut session = self.session.lock().await;

        if let Some(tokens) = session.tokens.as_ref() {
            if tokens.access_token != rejected.access_token && !tokens.is_expired() {
                return Ok(AuthorizedSession::from_tokens(tokens));
            }
        }

        warn!("Access token rejected by Gmail, refreshing");
        session.state = SessionState::Expired;
        self.refresh_locked(&mut session).await
    }

    async fn refresh_locked(&self, session: &mut Session) -> Result<AuthorizedSession> {
        let refresh_token = match session.tokens.as_ref() {
            Some(tokens) if tokens.is_refreshable() => tokens.refresh_token.clone().unwrap_or_default(),
            Some(_) => return Err(GmailMcpError::Auth(AuthError::NotRefreshable)),
            None => {
                return Err(GmailMcpError::Auth(AuthError::CredentialsNotFound {
                    path: self.store.token_path().display().to_string(),
                }))
            }
        };

        match self.request_refresh(&refresh_token).await {
            Ok(refreshed) => {
                // Memory only changes once the new set is on disk.
                let mut tokens = session.tokens.clone().unwrap_or_else(|| refreshed.clone());
                tokens.apply_refresh(refreshed);
                self.store.save_tokens(&tokens)?;

                let current = AuthorizedSession::from_tokens(&tokens);
                info!(expiry = ?tokens.expiry_date, "Refreshed access token");
                session.tokens = Some(tokens);
                session.state = SessionState::Authorized;
                Ok(current)
            }
            Err(e @ GmailMcpError::Auth(AuthError::Revoked { .. })) => {
                warn!(error = %e, "Refresh token rejected, discarding stored tokens");
                session.tokens = None;
                session.state = SessionState::Revoked;
                self.store.remove_tokens()?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh grant with a single delayed retry on transient failures
    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let client_secret = &self.client_secret;
        let params = [
            ("client_id", client_secret.client_id.as_str()),
            ("client_secret", client_secret.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let params = &params;

        let attempt = || async move {
            self.post_token_request(params, refresh_rejection).await
        };

        let response = attempt
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.config.retry_backoff)
                    .with_max_times(1),
            )
            .when(|e| e.is_retryable())
            .notify(|e, delay| warn!(error = %e, ?delay, "Token refresh failed, retrying"))
            .await?;

        Ok(response.into_tokens(unix_now()))
    }

    /// POST to the token endpoint. 4xx rejections are mapped with `rejected`,
    /// which receives the OAuth error code and a readable reason; 429 and 5xx
    /// are transient.
    async fn post_token_request(
        &self,
        params: &[(&str, &str)],
        rejected: fn(&str, String) -> AuthError,
    ) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(&self.client_secret.token_uri)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response.json::<TokenResponse>().await.map_err(|e| {
                GmailMcpError::Auth(AuthError::TokenRefreshFailed {
                    message: format!("malformed token response: {}", e.without_url()),
                })
            });
        }

        let body = response.text().await.unwrap_or_default();
        let (code, reason) = match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(OAuthErrorResponse {
                error,
                error_description: Some(description),
            }) => {
                let reason = format!("{}: {}", error, description);
                (error, reason)
            }
            Ok(OAuthErrorResponse { error, .. }) => (error.clone(), error),
            Err(_) => (String::new(), status.to_string()),
        };

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GmailMcpError::Gmail(GmailApiError::ServiceUnavailable {
                status: status.as_u16(),
                message: format!("token endpoint: {}", reason),
            }));
        }

        Err(GmailMcpError::Auth(rejected(&code, reason)))
    }

    /// Build the consent URL
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        let scopes = self.config.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            self.client_secret.auth_uri,
            urlencoding::encode(&self.client_secret.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }

    /// Exchange an authorization code for a token set
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet> {
        let client_secret = &self.client_secret;
        let params = [
            ("client_id", client_secret.client_id.as_str()),
            ("client_secret", client_secret.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .post_token_request(&params, |_, message| AuthError::TokenExchangeFailed { message })
            .await?;
        Ok(response.into_tokens(unix_now()))
    }

    /// Run the consent flow with a local redirect listener, replacing any
    /// stored tokens on success.
    pub async fn authenticate_interactive(&self) -> Result<AuthorizedSession> {
        let mut session = self.session.lock().await;
        let previous = session.state;
        session.state = SessionState::Authorizing;

        match self.run_consent_flow().await {
            Ok(tokens) => {
                self.store.save_tokens(&tokens)?;
                let current = AuthorizedSession::from_tokens(&tokens);
                session.tokens = Some(tokens);
                session.state = SessionState::Authorized;
                info!("Authorization completed");
                Ok(current)
            }
            Err(e) => {
                warn!(error = %e, "Authorization failed");
                session.state = previous;
                Err(e)
            }
        }
    }

    async fn run_consent_flow(&self) -> Result<TokenSet> {
        let listener = CallbackListener::bind(self.config.oauth_callback_port).await?;
        let redirect_uri = listener.redirect_uri();
        let state = uuid::Uuid::new_v4().to_string();
        let auth_url = self.authorization_url(&redirect_uri, &state);

        eprintln!("\nPlease visit this URL to authenticate:");
        eprintln!("{}\n", auth_url);

        if self.config.open_browser {
            if let Err(e) = open::that(&auth_url) {
                eprintln!("Could not open browser automatically: {}", e);
                eprintln!("Please open the URL manually.");
            }
        }

        let code = listener.wait(&state, self.config.auth_timeout).await?;
        eprintln!("Received authorization code, exchanging for tokens...");
        self.exchange_code(&code, &redirect_uri).await
    }
}
