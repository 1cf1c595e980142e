use async_trait::async_trait;

use crate::error::ChatError;

/// Wire-level chat session (Twitch IRC, loopback, …).
///
/// Inbound activity is not returned from these calls: implementations push
/// [`ChatEvent`](crate::types::ChatEvent)s into the queue they were built with,
/// and the connection manager drains it from a single task.
///
/// Implementations must be `Send + Sync` so the manager can share them
/// between the event loop, reconnect timers and tool calls.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Stable lowercase identifier for logs (e.g. `"irc"`).
    fn name(&self) -> &str;

    /// Open the session and authenticate.
    ///
    /// Returns once the server accepted the login; a `Connected` event is
    /// queued before returning.
    async fn connect(&self) -> Result<(), ChatError>;

    /// Close the session. No `Disconnected` event is emitted for this.
    async fn disconnect(&self) -> Result<(), ChatError>;

    /// Request to join a channel (normalized name). The confirmation arrives as
    /// a `Joined` event.
    async fn join(&self, channel: &str) -> Result<(), ChatError>;

    /// Request to leave a channel. The confirmation arrives as a `Parted` event.
    async fn part(&self, channel: &str) -> Result<(), ChatError>;

    /// Send a chat line to a channel.
    async fn say(&self, channel: &str, text: &str) -> Result<(), ChatError>;
}
