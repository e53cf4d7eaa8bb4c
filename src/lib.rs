//! Gmail MCP adapter library
//!
//! Credential storage, an OAuth2 session, a Gmail REST client and the MCP
//! tool surface built on top of them.

pub mod config;
pub mod error;
pub mod gmail;
pub mod mcp;

pub use config::Config;
pub use error::{ErrorKind, GmailMcpError, Result};
