//! MCP stdio server.
//!
//! Exposes the chat tools to an MCP client (an LLM host) that spawns this
//! process and talks to it over its pipes.
//!
//! Protocol: JSON-RPC 2.0 over stdin/stdout (one JSON object per line).
//! stdout carries nothing but responses; logs go to stderr.

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use twitch_mcp_protocol::frames::{JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND};
use twitch_mcp_protocol::handshake::{InitializeParams, InitializeResult};
use twitch_mcp_protocol::methods;
use twitch_mcp_protocol::tools::{ToolCallParams, ToolsListResult};

use crate::tools::ToolDispatcher;

pub const SERVER_NAME: &str = "twitch-mcp";

pub struct McpBridge {
    dispatcher: ToolDispatcher,
}

impl McpBridge {
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Serve requests line by line until `input` reaches EOF.
    ///
    /// Requests are handled one at a time, so responses come back in request
    /// order.
    pub async fn serve<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(trimmed).await {
                write_response(&mut output, &response).await?;
            }
        }
        info!("MCP client closed stdin");
        Ok(())
    }

    /// Handle one raw line. `None` means nothing is written back (notifications).
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match JsonRpcRequest::parse(line) {
            Ok(request) => self.handle_request(request).await,
            Err(response) => {
                warn!("rejected malformed JSON-RPC line");
                Some(response)
            }
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);
        // Notifications (no id) don't get a response.
        let is_notification = request.is_notification();
        debug!(method = %request.method, "MCP request");

        let response = match request.method.as_str() {
            methods::INITIALIZE => {
                let params: InitializeParams = request
                    .params
                    .and_then(|p| serde_json::from_value(p).ok())
                    .unwrap_or_default();
                info!(
                    client = params
                        .client_info
                        .as_ref()
                        .and_then(|c| c.name.as_deref())
                        .unwrap_or("unknown"),
                    protocol = params.protocol_version.as_deref().unwrap_or("unspecified"),
                    "MCP client initializing"
                );
                JsonRpcResponse::ok(
                    id,
                    InitializeResult::new(SERVER_NAME, env!("CARGO_PKG_VERSION")),
                )
            }

            methods::INITIALIZED => return None,

            methods::PING => JsonRpcResponse::ok(id, json!({})),

            methods::TOOLS_LIST => JsonRpcResponse::ok(
                id,
                ToolsListResult {
                    tools: ToolDispatcher::tool_definitions(),
                },
            ),

            methods::TOOLS_CALL => {
                let params = request.params.unwrap_or(Value::Null);
                match serde_json::from_value::<ToolCallParams>(params) {
                    Ok(call) => {
                        let args = call.arguments.unwrap_or(Value::Null);
                        let result = self.dispatcher.call(&call.name, args).await;
                        JsonRpcResponse::ok(id, result)
                    }
                    Err(e) => {
                        JsonRpcResponse::err(id, INVALID_PARAMS, format!("Invalid params: {e}"))
                    }
                }
            }

            other => JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
        };

        if is_notification {
            return None;
        }
        Some(response)
    }
}

/// Write one JSON-RPC response followed by a newline and flush.
async fn write_response<W: AsyncWrite + Unpin>(
    output: &mut W,
    response: &JsonRpcResponse,
) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    output.write_all(&bytes).await?;
    output.flush().await
}
