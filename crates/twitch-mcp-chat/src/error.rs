use thiserror::Error;

/// Errors raised by the chat transport and the connection manager.
#[derive(Debug, Error)]
pub enum ChatError {
    /// An operation that needs a live session ran while disconnected.
    #[error("Not connected to Twitch chat")]
    NotConnected,

    /// The transport could not be established (network, DNS, handshake).
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server rejected the login or token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A chat message could not be delivered.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// A join or part was rejected or could not be issued.
    #[error("Channel operation failed for #{channel}: {reason}")]
    ChannelOperation { channel: String, reason: String },

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The server sent something the transport could not make sense of.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::NotConnected => "NOT_CONNECTED",
            ChatError::ConnectionFailed(_) => "CONNECTION_ERROR",
            ChatError::AuthFailed(_) => "AUTH_FAILED",
            ChatError::SendFailed(_) => "SEND_ERROR",
            ChatError::ChannelOperation { .. } => "CHANNEL_OPERATION_ERROR",
            ChatError::Timeout { .. } => "TIMEOUT",
            ChatError::Protocol(_) => "PROTOCOL_ERROR",
        }
    }

    /// True for failures of the initial connect (credentials or network).
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ChatError::ConnectionFailed(_) | ChatError::AuthFailed(_)
        )
    }
}
