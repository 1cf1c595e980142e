//! In-process transport with no network: every request is acknowledged
//! through the event queue the same way the IRC transport would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use twitch_mcp_core::types::normalize_channel;

use crate::{
    error::ChatError,
    transport::ChatTransport,
    types::{ChatEvent, IncomingMessage},
};

pub struct LoopbackTransport {
    login: String,
    events: mpsc::Sender<ChatEvent>,
    connected: AtomicBool,
    sent: Mutex<Vec<(String, String)>>,
}

impl LoopbackTransport {
    pub fn new(login: &str, events: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            login: login.trim().to_lowercase(),
            events,
            connected: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// `(channel, text)` of every line sent so far.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Deliver a chat line as if another user had written it.
    pub async fn inject(&self, message: IncomingMessage) -> Result<(), ChatError> {
        self.emit(ChatEvent::Message(message)).await
    }

    /// Simulate the server dropping the session.
    pub async fn drop_connection(&self, reason: &str) -> Result<(), ChatError> {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(ChatEvent::Disconnected {
            reason: reason.to_string(),
        })
        .await
    }

    async fn emit(&self, event: ChatEvent) -> Result<(), ChatError> {
        self.events
            .send(event)
            .await
            .map_err(|_| ChatError::Protocol("event queue closed".into()))
    }

    fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn connect(&self) -> Result<(), ChatError> {
        self.connected.store(true, Ordering::SeqCst);
        info!(login = %self.login, "loopback session opened");
        self.emit(ChatEvent::Connected).await
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<(), ChatError> {
        let channel = normalize_channel(channel);
        if !self.is_open() {
            return Err(ChatError::ChannelOperation {
                channel,
                reason: "not connected".into(),
            });
        }
        self.emit(ChatEvent::Joined { channel }).await
    }

    async fn part(&self, channel: &str) -> Result<(), ChatError> {
        let channel = normalize_channel(channel);
        if !self.is_open() {
            return Err(ChatError::ChannelOperation {
                channel,
                reason: "not connected".into(),
            });
        }
        self.emit(ChatEvent::Parted { channel }).await
    }

    async fn say(&self, channel: &str, text: &str) -> Result<(), ChatError> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }
        let channel = normalize_channel(channel);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((channel.clone(), text.to_string()));
        }
        // Echo our own line back, flagged, like a client-side echo would.
        self.emit(ChatEvent::Message(IncomingMessage {
            channel,
            login: Some(self.login.clone()),
            text: text.to_string(),
            is_self: true,
            ..Default::default()
        }))
        .await
    }
}
