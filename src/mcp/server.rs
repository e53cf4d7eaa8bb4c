//! MCP Server implementation
//!
//! Newline-delimited JSON-RPC over stdio. Requests are handled one at a
//! time; stdout carries only protocol messages.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::gmail::client::GmailClient;
use crate::mcp::tools::ToolHandler;
use crate::mcp::types::*;

const SERVER_NAME: &str = "gmail";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server for Gmail
pub struct McpServer {
    tool_handler: ToolHandler,

    initialized: bool,
}

impl McpServer {
    pub fn new(gmail_client: Arc<GmailClient>) -> Self {
        Self {
            tool_handler: ToolHandler::new(gmail_client),
            initialized: false,
        }
    }

    /// Serve on stdin/stdout until stdin closes
    pub async fn run_stdio(&mut self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    /// Serve line-delimited messages from `reader`, writing responses to `writer`
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(&line).await {
                let mut encoded = serde_json::to_vec(&response)?;
                encoded.push(b'\n');
                writer.write_all(&encoded).await?;
                writer.flush().await?;
            }
        }

        info!("Input closed, shutting down");
        Ok(())
    }

    /// Handle one JSON-RPC message. Notifications produce no response.
    pub async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "Unparseable JSON-RPC message");
                return Some(JsonRpcResponse::error(
                    None,
                    JsonRpcError::parse_error(e.to_string()),
                ));
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request(format!(
                    "unsupported jsonrpc version: {}",
                    request.jsonrpc
                )),
            ));
        }

        if request.is_notification() {
            if request.method == methods::INITIALIZED {
                self.initialized = true;
            }
            debug!(method = %request.method, "Notification received");
            return None;
        }

        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(),
            methods::PING => Ok(serde_json::json!({})),
            methods::LIST_TOOLS => self.handle_list_tools(),
            methods::CALL_TOOL => self.handle_call_tool(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn handle_initialize(&self) -> std::result::Result<Value, JsonRpcError> {
        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {}),
            },
        };
        encode(&result)
    }

    fn handle_list_tools(&self) -> std::result::Result<Value, JsonRpcError> {
        encode(&ListToolsResult {
            tools: self.tool_handler.list_tools(),
        })
    }

    async fn handle_call_tool(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing tool parameters"))?;
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(format!("invalid tool parameters: {}", e)))?;

        let result = self
            .tool_handler
            .call_tool(&params.name, params.arguments)
            .await;
        encode(&result)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError {
        code: -32603,
        message: e.to_string(),
        data: None,
    })
}
