use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use twitch_mcp_core::types::{resolve_username, ChatMessage};

/// Notification pushed by a transport into the manager's event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Login accepted; the session is usable.
    Connected,
    /// The session dropped without being asked to.
    Disconnected { reason: String },
    /// A chat line arrived on a joined channel.
    Message(IncomingMessage),
    /// The server confirmed our own JOIN.
    Joined { channel: String },
    /// The server confirmed our own PART.
    Parted { channel: String },
}

/// A chat line as the transport saw it, before it becomes a [`ChatMessage`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IncomingMessage {
    /// Normalized channel name.
    pub channel: String,
    /// Sender login (IRC nick), if known.
    pub login: Option<String>,
    /// Sender display name (`display-name` tag), if present.
    pub display_name: Option<String>,
    pub text: String,
    /// Server-assigned message id (`id` tag), if present.
    pub id: Option<String>,
    /// Remaining protocol tags.
    pub tags: BTreeMap<String, Value>,
    /// The message was authored by the bot itself.
    pub is_self: bool,
}

impl IncomingMessage {
    /// Build the immutable stored form, capturing the current time.
    pub fn into_chat_message(self) -> ChatMessage {
        let username = resolve_username(self.display_name.as_deref(), self.login.as_deref());
        ChatMessage::new(&self.channel, &username, self.text)
            .with_id(self.id.as_deref())
            .with_metadata(self.tags)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Process-wide connection bookkeeping owned by the connection manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Channels confirmed joined, normalized.
    pub joined_channels: BTreeSet<String>,
    /// Consecutive automatic reconnects since the last successful connect.
    pub reconnect_attempts: u32,
    /// A reconnect timer is armed and has not fired yet.
    #[serde(skip)]
    pub(crate) reconnect_pending: bool,
    /// The last disconnect was requested; drops are not retried.
    #[serde(skip)]
    pub(crate) manual_disconnect: bool,
    /// Bumped by every explicit connect/disconnect; stale reconnect timers
    /// compare against it and stand down.
    #[serde(skip)]
    pub(crate) epoch: u64,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }
}
