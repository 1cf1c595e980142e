//! Tool dispatcher: the six chat tools exposed over MCP.
//!
//! Raw `(name, arguments)` calls are decoded once into a typed [`ToolRequest`],
//! routed to the connection manager or the message store, and rendered as a
//! [`ToolCallResult`]. Every call resolves to an envelope; failures never
//! escape as faults.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use twitch_mcp_chat::{ChatError, ConnectionManager};
use twitch_mcp_core::types::{
    from_epoch_millis, normalize_channel, parse_timestamp, ChatMessage, MessageFilter,
};
use twitch_mcp_protocol::methods;
use twitch_mcp_protocol::tools::{ToolCallResult, ToolDefinition};
use twitch_mcp_store::store::DEFAULT_RECENT_LIMIT;

/// Errors a tool call can end in. Rendered into the envelope, never thrown.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Missing, empty or mistyped arguments.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The connection manager rejected the operation.
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Validation(_) => "VALIDATION_ERROR",
            ToolError::UnknownTool(_) => "UNKNOWN_TOOL",
            ToolError::Chat(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct SendMessageArgs {
    channel: String,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JoinChannelArgs {
    channel: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RecentMessagesArgs {
    channel: String,
    #[serde(default)]
    limit: Option<i64>,
}

/// `since`/`until` may arrive as a string or as epoch milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TimestampArg {
    Millis(i64),
    Text(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterMessagesArgs {
    channel: Option<String>,
    username: Option<String>,
    contains: Option<String>,
    since: Option<TimestampArg>,
    until: Option<TimestampArg>,
    page: Option<i64>,
    page_size: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AllMessagesArgs {
    channel: Option<String>,
}

/// A validated tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    SendMessage { channel: String, text: String },
    JoinChannel { channel: String },
    GetRecentMessages { channel: String, limit: usize },
    FilterMessages(MessageFilter),
    GetAllMessages { channel: Option<String> },
    GetStatus,
}

impl ToolRequest {
    /// Decode and validate raw arguments for `name`.
    ///
    /// `null` or absent arguments are treated as an empty object.
    pub fn parse(name: &str, args: Value) -> Result<Self, ToolError> {
        let args = match args {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        match name {
            methods::SEND_MESSAGE => {
                let a: SendMessageArgs = decode(args)?;
                let text = a.text;
                if text.trim().is_empty() {
                    return Err(ToolError::Validation("text must not be empty".into()));
                }
                Ok(Self::SendMessage {
                    channel: required_channel(&a.channel)?,
                    text,
                })
            }
            methods::JOIN_CHANNEL => {
                let a: JoinChannelArgs = decode(args)?;
                Ok(Self::JoinChannel {
                    channel: required_channel(&a.channel)?,
                })
            }
            methods::GET_RECENT_MESSAGES => {
                let a: RecentMessagesArgs = decode(args)?;
                let limit = match a.limit {
                    None => DEFAULT_RECENT_LIMIT,
                    Some(n) if n >= 1 => usize::try_from(n).unwrap_or(usize::MAX),
                    Some(n) => {
                        return Err(ToolError::Validation(format!(
                            "limit must be at least 1 (got {n})"
                        )))
                    }
                };
                Ok(Self::GetRecentMessages {
                    channel: required_channel(&a.channel)?,
                    limit,
                })
            }
            methods::FILTER_MESSAGES => {
                let a: FilterMessagesArgs = decode(args)?;
                Ok(Self::FilterMessages(MessageFilter {
                    channel: optional_channel(a.channel),
                    username: non_empty(a.username),
                    contains: non_empty(a.contains),
                    since: a.since.map(|t| timestamp("since", t)).transpose()?,
                    until: a.until.map(|t| timestamp("until", t)).transpose()?,
                    page: a.page,
                    page_size: a.page_size,
                }))
            }
            methods::GET_ALL_MESSAGES => {
                let a: AllMessagesArgs = decode(args)?;
                Ok(Self::GetAllMessages {
                    channel: optional_channel(a.channel),
                })
            }
            methods::GET_STATUS => Ok(Self::GetStatus),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::Validation(e.to_string()))
}

fn required_channel(raw: &str) -> Result<String, ToolError> {
    let channel = normalize_channel(raw);
    if channel.is_empty() {
        return Err(ToolError::Validation("channel must not be empty".into()));
    }
    Ok(channel)
}

fn optional_channel(raw: Option<String>) -> Option<String> {
    raw.map(|c| normalize_channel(&c)).filter(|c| !c.is_empty())
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.is_empty())
}

fn timestamp(field: &str, raw: TimestampArg) -> Result<DateTime<Utc>, ToolError> {
    match raw {
        TimestampArg::Millis(ms) => from_epoch_millis(ms)
            .ok_or_else(|| ToolError::Validation(format!("{field}: timestamp out of range: {ms}"))),
        TimestampArg::Text(s) => {
            parse_timestamp(&s).map_err(|e| ToolError::Validation(format!("{field}: {e}")))
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    connected: bool,
    status: twitch_mcp_chat::ConnectionStatus,
    channels: Vec<String>,
    reconnect_attempts: u32,
    message_count: usize,
}

pub struct ToolDispatcher {
    manager: Arc<ConnectionManager>,
}

impl ToolDispatcher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Run one tool call. Never fails: errors come back with `isError: true`.
    pub async fn call(&self, name: &str, args: Value) -> ToolCallResult {
        let result = match ToolRequest::parse(name, args) {
            Ok(request) => self.execute(request).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(ok) => {
                debug!(tool = name, "tool call succeeded");
                ok
            }
            Err(e) => {
                warn!(tool = name, code = e.code(), error = %e, "tool call failed");
                ToolCallResult::error(e.to_string())
            }
        }
    }

    async fn execute(&self, request: ToolRequest) -> Result<ToolCallResult, ToolError> {
        let store = self.manager.store();
        match request {
            ToolRequest::SendMessage { channel, text } => {
                self.manager.send_message(&channel, &text).await?;
                Ok(
                    ToolCallResult::success(format!("Message sent to #{channel}: {text}"))
                        .with_structured(json!({ "channel": channel, "text": text })),
                )
            }
            ToolRequest::JoinChannel { channel } => {
                let channel = self.manager.join_channel(&channel).await?;
                Ok(ToolCallResult::success(format!("Joined channel #{channel}"))
                    .with_structured(json!({ "channel": channel })))
            }
            ToolRequest::GetRecentMessages { channel, limit } => {
                let messages = store.recent_messages(&channel, limit);
                let text = if messages.is_empty() {
                    format!("No messages found in #{channel}")
                } else {
                    format!(
                        "Recent messages in #{channel} ({}):\n{}",
                        messages.len(),
                        render_lines(&messages)
                    )
                };
                Ok(messages_result(text, Some(&channel), &messages))
            }
            ToolRequest::FilterMessages(filter) => {
                let messages = store.filter_messages(&filter);
                let text = if messages.is_empty() {
                    "No messages found matching the filter".to_string()
                } else {
                    let mut header = format!("Found {} matching messages", messages.len());
                    if let Some(ref channel) = filter.channel {
                        header.push_str(&format!(" in #{channel}"));
                    }
                    if let (Some(page), Some(size)) = (filter.page, filter.page_size) {
                        header.push_str(&format!(" (page {page}, page size {size})"));
                    }
                    format!("{header}:\n{}", render_lines(&messages))
                };
                Ok(messages_result(text, filter.channel.as_deref(), &messages))
            }
            ToolRequest::GetAllMessages { channel } => {
                let messages = store.all_messages(channel.as_deref());
                let scope = match channel {
                    Some(ref c) => format!("in #{c}"),
                    None => "across all channels".to_string(),
                };
                let text = if messages.is_empty() {
                    format!("No messages found {scope}")
                } else {
                    format!(
                        "All messages {scope} ({}):\n{}",
                        messages.len(),
                        render_lines(&messages)
                    )
                };
                Ok(messages_result(text, channel.as_deref(), &messages))
            }
            ToolRequest::GetStatus => {
                let state = self.manager.state();
                let report = StatusReport {
                    connected: state.is_connected(),
                    status: state.status,
                    channels: state.joined_channels.iter().cloned().collect(),
                    reconnect_attempts: state.reconnect_attempts,
                    message_count: store.message_count(None),
                };
                let channels = if report.channels.is_empty() {
                    "none".to_string()
                } else {
                    report
                        .channels
                        .iter()
                        .map(|c| format!("#{c}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                let text = format!(
                    "Connected: {}\nChannels: {}\nStored messages: {}",
                    if report.connected { "yes" } else { "no" },
                    channels,
                    report.message_count
                );
                let structured = serde_json::to_value(&report).unwrap_or(Value::Null);
                Ok(ToolCallResult::success(text).with_structured(structured))
            }
        }
    }

    /// Manifest for `tools/list`, in a fixed order.
    pub fn tool_definitions() -> Vec<ToolDefinition> {
        vec![
            definition(
                methods::SEND_MESSAGE,
                "Send a chat message to a Twitch channel.",
                json!({
                    "type": "object",
                    "properties": {
                        "channel": { "type": "string", "description": "Channel name, with or without '#'" },
                        "text": { "type": "string", "description": "Message text" }
                    },
                    "required": ["channel", "text"]
                }),
            ),
            definition(
                methods::JOIN_CHANNEL,
                "Join a Twitch channel so its chat is recorded.",
                json!({
                    "type": "object",
                    "properties": {
                        "channel": { "type": "string", "description": "Channel name, with or without '#'" }
                    },
                    "required": ["channel"]
                }),
            ),
            definition(
                methods::GET_RECENT_MESSAGES,
                "Get the most recent messages recorded in a channel, oldest first.",
                json!({
                    "type": "object",
                    "properties": {
                        "channel": { "type": "string", "description": "Channel name" },
                        "limit": {
                            "type": "number",
                            "description": "Maximum number of messages (default: 10)",
                            "default": 10
                        }
                    },
                    "required": ["channel"]
                }),
            ),
            definition(
                methods::FILTER_MESSAGES,
                "Search recorded messages by channel, username, text and time range, with optional pagination.",
                json!({
                    "type": "object",
                    "properties": {
                        "channel": { "type": "string", "description": "Only this channel" },
                        "username": { "type": "string", "description": "Case-insensitive username substring" },
                        "contains": { "type": "string", "description": "Case-insensitive text substring" },
                        "since": { "type": "string", "description": "Inclusive lower bound (ISO 8601 or epoch ms)" },
                        "until": { "type": "string", "description": "Inclusive upper bound (ISO 8601 or epoch ms)" },
                        "page": { "type": "number", "description": "Zero-based page index" },
                        "pageSize": { "type": "number", "description": "Messages per page (default: 10)" }
                    }
                }),
            ),
            definition(
                methods::GET_ALL_MESSAGES,
                "Get every retained message for one channel, or all channels sorted by time.",
                json!({
                    "type": "object",
                    "properties": {
                        "channel": { "type": "string", "description": "Channel name (omit for all channels)" }
                    }
                }),
            ),
            definition(
                methods::GET_STATUS,
                "Report the chat connection status and joined channels.",
                json!({ "type": "object", "properties": {} }),
            ),
        ]
    }
}

fn definition(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// `[timestamp] username: text`, one per line.
fn render_lines(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            format!(
                "[{}] {}: {}",
                m.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                m.username,
                m.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn messages_result(text: String, channel: Option<&str>, messages: &[ChatMessage]) -> ToolCallResult {
    ToolCallResult::success(text).with_structured(json!({
        "channel": channel,
        "count": messages.len(),
        "messages": messages,
    }))
}
