//! Gmail MCP adapter
//!
//! Exposes a Gmail mailbox as Model Context Protocol tools over stdio.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use gmail_mcp_adapter::config::Config;
use gmail_mcp_adapter::gmail::auth::Authenticator;
use gmail_mcp_adapter::gmail::client::GmailClient;
use gmail_mcp_adapter::mcp::server::McpServer;

#[derive(Parser)]
#[command(name = "gmail-mcp")]
#[command(author, version, about = "Gmail tools for MCP clients over stdio")]
struct Cli {
    /// Print the authorization URL instead of opening a browser
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the consent flow and store fresh credentials
    Auth,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // stdout is reserved for JSON-RPC
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::new().context("failed to load configuration")?;
    if cli.no_browser {
        config.open_browser = false;
    }

    if config
        .find_and_copy_oauth_keys()
        .context("failed to copy OAuth keys")?
    {
        info!(path = %config.oauth_path.display(), "Copied OAuth keys into config directory");
    }

    let authenticator = Arc::new(Authenticator::new(config).with_context(|| {
        "OAuth client secret unavailable; place gcp-oauth.keys.json in the current directory \
         or set GMAIL_OAUTH_PATH"
    })?);

    match cli.command {
        Some(Commands::Auth) => {
            authenticator
                .authenticate_interactive()
                .await
                .context("authentication failed")?;
            eprintln!("Authentication completed successfully!");
        }
        None => {
            authenticator
                .ensure_session()
                .await
                .context("authentication failed")?;

            let gmail_client = Arc::new(GmailClient::new(authenticator));
            let mut server = McpServer::new(gmail_client);
            server.run_stdio().await.context("MCP server failed")?;
        }
    }

    Ok(())
}
