//! Gmail API module
//!
//! Credential storage, the OAuth session, and the client for the Gmail REST API.

pub mod auth;
pub mod callback;
pub mod client;
pub mod credentials;
pub mod drafts;
pub mod labels;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
