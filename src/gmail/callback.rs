//! Local redirect listener for the OAuth consent flow
//!
//! The listener is bound before the authorization URL is built so that an
//! ephemeral port can be used in the redirect URI.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{AuthError, GmailMcpError, Result};

pub const CALLBACK_PATH: &str = "/oauth2callback";

/// Query parameters Google appends to the redirect
#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

struct CallbackState {
    expected_state: String,
    tx: Option<oneshot::Sender<Result<String>>>,
}

/// A bound, not yet serving, redirect listener
pub struct CallbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl CallbackListener {
    /// Bind on loopback. Port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .map_err(|e| AuthError::CallbackError {
                message: format!("failed to bind port {}: {}", port, e),
            })?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.addr.port(), CALLBACK_PATH)
    }

    /// Serve until one redirect arrives or `timeout` elapses, returning the
    /// authorization code.
    pub async fn wait(self, expected_state: &str, timeout: Duration) -> Result<String> {
        let Self { listener, addr } = self;
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(CallbackState {
            expected_state: expected_state.to_string(),
            tx: Some(tx),
        }));

        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!(port = addr.port(), "Waiting for OAuth redirect");
        let outcome = tokio::time::timeout(timeout, rx).await;

        // Let the browser receive its page before the listener goes away.
        let _ = shutdown_tx.send(());
        if tokio::time::timeout(Duration::from_secs(2), server).await.is_err() {
            debug!("Callback server did not drain in time");
        }

        match outcome {
            Err(_) => {
                warn!(secs = timeout.as_secs(), "OAuth redirect timed out");
                Err(GmailMcpError::Auth(AuthError::Timeout {
                    secs: timeout.as_secs(),
                }))
            }
            Ok(Err(_)) => Err(GmailMcpError::Auth(AuthError::CallbackError {
                message: "callback channel closed".to_string(),
            })),
            Ok(Ok(result)) => result,
        }
    }
}

async fn handle_callback(
    State(state): State<Arc<Mutex<CallbackState>>>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    let mut state = state.lock().await;

    let (result, page) = match check_params(params, &state.expected_state) {
        Ok(code) => (Ok(code), result_page(true, "You can close this window.")),
        Err(e) => {
            let page = result_page(false, &e.to_string());
            (Err(e), page)
        }
    };

    match state.tx.take() {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => debug!("Ignoring repeated OAuth redirect"),
    }

    Html(page)
}

fn check_params(params: CallbackParams, expected_state: &str) -> Result<String> {
    if let Some(error) = params.error {
        let reason = match params.error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        };
        return Err(GmailMcpError::Auth(AuthError::ConsentDenied { reason }));
    }

    if params.state.as_deref() != Some(expected_state) {
        return Err(GmailMcpError::Auth(AuthError::StateMismatch));
    }

    match params.code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(GmailMcpError::Auth(AuthError::NoAuthCode)),
    }
}

fn result_page(success: bool, detail: &str) -> String {
    let title = if success {
        "Authentication successful!"
    } else {
        "Authentication failed"
    };
    format!(
        "<html><body><h1>{}</h1><p>{}</p></body></html>",
        title,
        detail.replace('<', "&lt;").replace('>', "&gt;")
    )
}
