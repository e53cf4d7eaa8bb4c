//! Error types for the Gmail MCP adapter
//!
//! Every failure that can reach a tool caller is normalized into one of the
//! kinds in [`ErrorKind`]. HTTP client errors are converted at the adapter
//! boundary and never carry request URLs, headers or token values.

use serde::Serialize;
use thiserror::Error;

/// Main error type for the Gmail MCP adapter
#[derive(Error, Debug)]
pub enum GmailMcpError {
    /// OAuth authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Gmail API errors
    #[error("Gmail API error: {0}")]
    Gmail(#[from] GmailApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// OAuth authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth keys file not found: {path}")]
    KeysFileNotFound { path: String },

    #[error("Invalid OAuth keys format: expected 'installed' or 'web' credentials")]
    InvalidKeysFormat,

    #[error("Not authenticated: no stored credentials at {path}")]
    CredentialsNotFound { path: String },

    #[error("Access token expired and no refresh token is available")]
    NotRefreshable,

    #[error("Refresh token was rejected ({reason}); re-run the authorization flow")]
    Revoked { reason: String },

    #[error("Failed to refresh access token: {message}")]
    TokenRefreshFailed { message: String },

    #[error("OAuth callback error: {message}")]
    CallbackError { message: String },

    #[error("Authorization was denied: {reason}")]
    ConsentDenied { reason: String },

    #[error("OAuth state mismatch on callback")]
    StateMismatch,

    #[error("Timed out after {secs}s waiting for the authorization redirect")]
    Timeout { secs: u64 },

    #[error("No authorization code provided")]
    NoAuthCode,

    #[error("Token exchange failed: {message}")]
    TokenExchangeFailed { message: String },
}

/// Gmail API errors
#[derive(Error, Debug)]
pub enum GmailApiError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Insufficient permissions: {message}")]
    PermissionDenied { message: String },

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Gmail service unavailable ({status}): {message}")]
    ServiceUnavailable { status: u16, message: String },

    #[error("Rejected by Gmail: {message}")]
    BadRequest { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Access token rejected by Gmail")]
    Unauthorized,

    #[error("API request failed ({status}): {message}")]
    RequestFailed { status: u16, message: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found: {path}")]
    DirNotFound { path: String },

    #[error("Failed to create config directory: {path}")]
    DirCreationFailed { path: String },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnvVar { var: String, value: String },
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid email address: {email}")]
    InvalidEmail { email: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid parameter: {name} - {message}")]
    InvalidParameter { name: String, message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Cannot delete system label: {label_id}")]
    SystemLabel { label_id: String },
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },
}

/// Caller-visible error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    NotFound,
    Permission,
    Validation,
    RateLimit,
    TransientNetwork,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Permission => "permission",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GmailMcpError {
    /// Classify this error for the tool caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            GmailMcpError::Auth(_) => ErrorKind::Authentication,
            GmailMcpError::Gmail(e) => match e {
                GmailApiError::NotFound { .. } => ErrorKind::NotFound,
                GmailApiError::PermissionDenied { .. } => ErrorKind::Permission,
                GmailApiError::RateLimited { .. } => ErrorKind::RateLimit,
                GmailApiError::Network { .. } | GmailApiError::ServiceUnavailable { .. } => {
                    ErrorKind::TransientNetwork
                }
                GmailApiError::BadRequest { .. } | GmailApiError::Conflict { .. } => {
                    ErrorKind::Validation
                }
                GmailApiError::Unauthorized => ErrorKind::Authentication,
                GmailApiError::RequestFailed { .. } => ErrorKind::Internal,
            },
            GmailMcpError::Validation(_) => ErrorKind::Validation,
            GmailMcpError::Mcp(_) => ErrorKind::Validation,
            GmailMcpError::Config(_) | GmailMcpError::Io(_) | GmailMcpError::Json(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether a single delayed retry is allowed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimit | ErrorKind::TransientNetwork
        )
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        GmailMcpError::Gmail(GmailApiError::NotFound {
            resource: resource.into(),
        })
    }

    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        GmailMcpError::Validation(ValidationError::InvalidParameter {
            name: name.into(),
            message: message.into(),
        })
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        GmailMcpError::Validation(ValidationError::MissingField {
            field: field.into(),
        })
    }
}

/// Result type alias for Gmail MCP operations
pub type Result<T> = std::result::Result<T, GmailMcpError>;

/// HTTP client failures are transport problems from the caller's point of view.
/// The URL is dropped so query strings never reach a tool result.
impl From<reqwest::Error> for GmailApiError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_decode() {
            return GmailApiError::RequestFailed {
                status: 0,
                message: format!("unexpected response body: {}", err),
            };
        }
        GmailApiError::Network {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GmailMcpError {
    fn from(err: reqwest::Error) -> Self {
        GmailMcpError::Gmail(GmailApiError::from(err))
    }
}
