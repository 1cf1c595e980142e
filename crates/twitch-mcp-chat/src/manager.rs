use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, trace, warn};

use twitch_mcp_core::config::TwitchMcpConfig;
use twitch_mcp_core::types::normalize_channel;
use twitch_mcp_store::MessageStore;

use crate::{
    error::ChatError,
    transport::ChatTransport,
    types::{ChatEvent, ConnectionState, ConnectionStatus},
};

/// Tunables for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Channel joined on every successful connect.
    pub default_channel: Option<String>,
    /// Automatic reconnects allowed after an unexpected drop before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed wait before each automatic reconnect (no exponential growth).
    pub reconnect_delay: Duration,
    /// Upper bound for each transport operation and for awaiting its acknowledgement.
    pub operation_timeout: Duration,
}

impl ConnectionSettings {
    pub fn from_config(config: &TwitchMcpConfig) -> Self {
        Self {
            default_channel: config
                .twitch
                .channel
                .as_deref()
                .map(normalize_channel)
                .filter(|c| !c.is_empty()),
            max_reconnect_attempts: config.connection.max_reconnect_attempts,
            reconnect_delay: Duration::from_secs(config.connection.reconnect_delay_secs),
            operation_timeout: Duration::from_millis(config.connection.operation_timeout_ms),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&TwitchMcpConfig::default())
    }
}

/// Owns the single chat session and feeds the message store.
///
/// State lives in a `watch` channel: event handlers and API calls mutate it
/// atomically, and callers that need an acknowledgement (connected, joined,
/// parted) wait on it instead of polling. All transport events are consumed
/// by [`ConnectionManager::run`], one at a time.
///
/// State machine: `Disconnected → Connecting → Connected → Disconnected`.
/// An unexpected drop schedules one reconnect after a fixed delay, up to
/// `max_reconnect_attempts` consecutive tries; an explicit
/// [`disconnect`](Self::disconnect) never does.
pub struct ConnectionManager {
    transport: Arc<dyn ChatTransport>,
    store: Arc<MessageStore>,
    settings: ConnectionSettings,
    state: watch::Sender<ConnectionState>,
}

/// Outcome of handling a lost link, decided under the state lock.
enum LinkLoss {
    Requested,
    AlreadyScheduled,
    GaveUp { attempts: u32 },
    Retry { attempt: u32, epoch: u64 },
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<MessageStore>,
        settings: ConnectionSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            transport,
            store,
            settings,
            state,
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Confirmed joined channels, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.state.borrow().joined_channels.iter().cloned().collect()
    }

    /// Drain transport events until the queue closes or `shutdown` flips.
    ///
    /// This is the only consumer of the queue, so store writes and state
    /// transitions driven by the transport happen strictly in arrival order.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ChatEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(transport = self.transport.name(), "connection event loop started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("connection event loop stopped");
    }

    /// Apply one transport event. Never suspends.
    pub fn handle_event(self: &Arc<Self>, event: ChatEvent) {
        match event {
            ChatEvent::Connected => {
                let accepted = self.state.send_if_modified(|s| {
                    // A connect that was in flight when disconnect() ran.
                    if s.manual_disconnect {
                        return false;
                    }
                    s.status = ConnectionStatus::Connected;
                    s.reconnect_attempts = 0;
                    s.reconnect_pending = false;
                    true
                });
                if !accepted {
                    info!("session came up after an explicit disconnect, closing it");
                    self.close_stale_session();
                    return;
                }
                info!("connected to Twitch chat");
                self.rejoin_channels();
            }
            ChatEvent::Disconnected { reason } => self.on_link_lost(&reason),
            ChatEvent::Message(message) => {
                if message.is_self {
                    trace!(channel = %message.channel, "skipping self-originated message");
                    return;
                }
                self.store.add_message(message.into_chat_message());
            }
            ChatEvent::Joined { channel } => {
                let channel = normalize_channel(&channel);
                info!(channel = %channel, "joined channel");
                self.state.send_modify(|s| {
                    s.joined_channels.insert(channel);
                });
            }
            ChatEvent::Parted { channel } => {
                let channel = normalize_channel(&channel);
                info!(channel = %channel, "left channel");
                self.state.send_modify(|s| {
                    s.joined_channels.remove(&channel);
                });
            }
        }
    }

    /// Open the session. No-op when already connected.
    ///
    /// A failure here is returned to the caller and is not retried.
    pub async fn connect(&self) -> Result<(), ChatError> {
        if self.is_connected() {
            debug!("connect requested while already connected");
            return Ok(());
        }
        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.manual_disconnect = false;
            s.reconnect_pending = false;
            s.epoch += 1;
        });
        info!(transport = self.transport.name(), "connecting to Twitch chat");

        if let Err(e) = bounded(self.settings.operation_timeout, self.transport.connect()).await {
            self.state.send_if_modified(|s| {
                let connecting = s.status == ConnectionStatus::Connecting;
                if connecting {
                    s.status = ConnectionStatus::Disconnected;
                }
                connecting
            });
            error!(error = %e, "connect failed");
            return Err(e);
        }

        self.wait_for(ConnectionState::is_connected).await
    }

    /// Close the session without scheduling a reconnect.
    ///
    /// Also cancels a reconnect that is waiting for its timer. Call this before
    /// the process exits so the remote session is not left half-open.
    pub async fn disconnect(&self) -> Result<(), ChatError> {
        let previous = self.state.borrow().status;
        self.state.send_modify(|s| {
            s.manual_disconnect = true;
            s.reconnect_pending = false;
            s.epoch += 1;
        });

        let result = if previous == ConnectionStatus::Disconnected {
            debug!("disconnect requested while already disconnected");
            Ok(())
        } else {
            bounded(self.settings.operation_timeout, self.transport.disconnect()).await
        };

        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Disconnected;
            s.joined_channels.clear();
        });
        if previous != ConnectionStatus::Disconnected {
            info!("disconnected from Twitch chat");
        }
        result
    }

    /// Send a chat line. Requires a connected session.
    pub async fn send_message(&self, channel: &str, text: &str) -> Result<(), ChatError> {
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }
        let channel = normalize_channel(channel);
        bounded(self.settings.operation_timeout, self.transport.say(&channel, text))
            .await
            .map_err(|e| match e {
                ChatError::SendFailed(_) | ChatError::NotConnected | ChatError::Timeout { .. } => e,
                other => ChatError::SendFailed(other.to_string()),
            })?;
        debug!(channel = %channel, "message sent");
        Ok(())
    }

    /// Join a channel and wait for the server's confirmation.
    ///
    /// Returns the normalized channel name.
    pub async fn join_channel(&self, channel: &str) -> Result<String, ChatError> {
        let channel = self.channel_operation_target(channel)?;
        if self.state.borrow().joined_channels.contains(&channel) {
            debug!(channel = %channel, "already joined");
            return Ok(channel);
        }
        bounded(self.settings.operation_timeout, self.transport.join(&channel))
            .await
            .map_err(|e| channel_error(&channel, e))?;
        self.wait_for(|s| s.joined_channels.contains(&channel))
            .await
            .map_err(|e| channel_error(&channel, e))?;
        Ok(channel)
    }

    /// Leave a channel and wait for the server's confirmation.
    pub async fn leave_channel(&self, channel: &str) -> Result<String, ChatError> {
        let channel = self.channel_operation_target(channel)?;
        if !self.state.borrow().joined_channels.contains(&channel) {
            debug!(channel = %channel, "not joined, nothing to leave");
            return Ok(channel);
        }
        bounded(self.settings.operation_timeout, self.transport.part(&channel))
            .await
            .map_err(|e| channel_error(&channel, e))?;
        self.wait_for(|s| !s.joined_channels.contains(&channel))
            .await
            .map_err(|e| channel_error(&channel, e))?;
        Ok(channel)
    }

    fn channel_operation_target(&self, channel: &str) -> Result<String, ChatError> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            return Err(ChatError::ChannelOperation {
                channel,
                reason: "channel name is empty".into(),
            });
        }
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }
        Ok(channel)
    }

    async fn wait_for(
        &self,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<(), ChatError> {
        let mut rx = self.state.subscribe();
        // Bound to a local so the borrowed `watch::Ref` is released before `rx`.
        let outcome = match timeout(self.settings.operation_timeout, rx.wait_for(predicate)).await {
            Ok(Ok(_)) => Ok(()),
            // The sender lives as long as `self`.
            Ok(Err(_)) => Err(ChatError::NotConnected),
            Err(_) => Err(timeout_error(self.settings.operation_timeout)),
        };
        outcome
    }

    // -----------------------------------------------------------------------
    // Reconnection
    // -----------------------------------------------------------------------

    /// Handle an unexpected drop (or a failed automatic reconnect).
    fn on_link_lost(self: &Arc<Self>, reason: &str) {
        let max = self.settings.max_reconnect_attempts;
        let mut outcome = LinkLoss::Requested;
        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Disconnected;
            outcome = if s.manual_disconnect {
                s.joined_channels.clear();
                LinkLoss::Requested
            } else if s.reconnect_pending {
                LinkLoss::AlreadyScheduled
            } else if s.reconnect_attempts >= max {
                s.joined_channels.clear();
                LinkLoss::GaveUp {
                    attempts: s.reconnect_attempts,
                }
            } else {
                s.reconnect_attempts += 1;
                s.reconnect_pending = true;
                LinkLoss::Retry {
                    attempt: s.reconnect_attempts,
                    epoch: s.epoch,
                }
            };
        });

        match outcome {
            LinkLoss::Requested => debug!(reason, "link closed after explicit disconnect"),
            LinkLoss::AlreadyScheduled => {
                debug!(reason, "link lost again, reconnect already scheduled")
            }
            LinkLoss::GaveUp { attempts } => error!(
                reason,
                attempts,
                "giving up on Twitch chat; call connect to try again"
            ),
            LinkLoss::Retry { attempt, epoch } => {
                warn!(
                    reason,
                    attempt,
                    max,
                    retry_after_secs = self.settings.reconnect_delay.as_secs(),
                    "lost Twitch chat connection, scheduling reconnect"
                );
                self.schedule_reconnect(attempt, epoch);
            }
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, attempt: u32, epoch: u64) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            sleep(manager.settings.reconnect_delay).await;

            let proceed = manager.state.send_if_modified(|s| {
                if s.epoch != epoch || s.manual_disconnect || !s.reconnect_pending {
                    return false;
                }
                s.reconnect_pending = false;
                s.status = ConnectionStatus::Connecting;
                true
            });
            if !proceed {
                debug!(attempt, "scheduled reconnect cancelled");
                return;
            }

            info!(attempt, "reconnecting to Twitch chat");
            let limit = manager.settings.operation_timeout;
            if let Err(e) = bounded(limit, manager.transport.connect()).await {
                warn!(attempt, error = %e, "reconnect attempt failed");
                manager.on_link_lost(&e.to_string());
                return;
            }
            let abandoned = manager.state.borrow().manual_disconnect;
            if abandoned {
                debug!(attempt, "disconnect requested while reconnecting");
                manager.close_stale_session();
            }
        });
    }

    /// Tear down a session nobody wants any more.
    fn close_stale_session(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let limit = manager.settings.operation_timeout;
            if let Err(e) = bounded(limit, manager.transport.disconnect()).await {
                warn!(error = %e, "failed to close stale session");
            }
        });
    }

    /// Re-issue joins for the default channel and anything held across a drop.
    fn rejoin_channels(self: &Arc<Self>) {
        let mut wanted: BTreeSet<String> = self.state.borrow().joined_channels.clone();
        if let Some(ref channel) = self.settings.default_channel {
            wanted.insert(channel.clone());
        }
        if wanted.is_empty() {
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let limit = manager.settings.operation_timeout;
            for channel in wanted {
                if let Err(e) = bounded(limit, manager.transport.join(&channel)).await {
                    warn!(channel = %channel, error = %e, "auto-join failed");
                }
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Run a transport operation with an upper time bound.
async fn bounded<T>(
    limit: Duration,
    op: impl Future<Output = Result<T, ChatError>>,
) -> Result<T, ChatError> {
    timeout(limit, op)
        .await
        .unwrap_or_else(|_| Err(timeout_error(limit)))
}

fn timeout_error(limit: Duration) -> ChatError {
    ChatError::Timeout {
        ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Keep "not connected" and timeouts as they are; everything else becomes a
/// channel operation failure for `channel`.
fn channel_error(channel: &str, e: ChatError) -> ChatError {
    match e {
        ChatError::ChannelOperation { .. } | ChatError::NotConnected | ChatError::Timeout { .. } => e,
        other => ChatError::ChannelOperation {
            channel: channel.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::loopback::LoopbackTransport;
    use crate::types::IncomingMessage;

    fn settings(delay_ms: u64) -> ConnectionSettings {
        ConnectionSettings {
            default_channel: None,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(delay_ms),
            operation_timeout: Duration::from_millis(500),
        }
    }

    /// Transport whose connects fail until told otherwise.
    struct FlakyTransport {
        events: mpsc::Sender<ChatEvent>,
        fail_connect: AtomicBool,
        hang_say: AtomicBool,
        connect_delay: Duration,
        connect_calls: AtomicU32,
        disconnect_calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(events: mpsc::Sender<ChatEvent>) -> Self {
            Self {
                events,
                fail_connect: AtomicBool::new(true),
                hang_say: AtomicBool::new(false),
                connect_delay: Duration::ZERO,
                connect_calls: AtomicU32::new(0),
                disconnect_calls: AtomicU32::new(0),
            }
        }

        /// Connects succeed, but only after `delay`.
        fn slow(events: mpsc::Sender<ChatEvent>, delay: Duration) -> Self {
            let transport = Self {
                connect_delay: delay,
                ..Self::new(events)
            };
            transport.fail_connect.store(false, Ordering::SeqCst);
            transport
        }
    }

    #[async_trait]
    impl ChatTransport for FlakyTransport {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn connect(&self) -> Result<(), ChatError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.connect_delay).await;
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(ChatError::ConnectionFailed("network unreachable".into()));
            }
            let _ = self.events.send(ChatEvent::Connected).await;
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), ChatError> {
            self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn join(&self, _channel: &str) -> Result<(), ChatError> {
            Err(ChatError::Protocol("msg_channel_suspended".into()))
        }
        async fn part(&self, _channel: &str) -> Result<(), ChatError> {
            Ok(())
        }
        async fn say(&self, _channel: &str, _text: &str) -> Result<(), ChatError> {
            if self.hang_say.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Err(ChatError::Protocol("rate limited".into()))
        }
    }

    struct Harness<T> {
        manager: Arc<ConnectionManager>,
        transport: Arc<T>,
        store: Arc<MessageStore>,
        _shutdown: watch::Sender<bool>,
    }

    fn start<T: ChatTransport + 'static>(
        build: impl FnOnce(mpsc::Sender<ChatEvent>) -> T,
        settings: ConnectionSettings,
    ) -> Harness<T> {
        let (tx, rx) = mpsc::channel(64);
        let transport = Arc::new(build(tx));
        let store = Arc::new(MessageStore::new(100));
        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            store.clone(),
            settings,
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(manager.clone().run(rx, shutdown_rx));
        Harness {
            manager,
            transport,
            store,
            _shutdown: shutdown_tx,
        }
    }

    fn loopback(settings: ConnectionSettings) -> Harness<LoopbackTransport> {
        start(|tx| LoopbackTransport::new("mybot", tx), settings)
    }

    async fn wait_state(
        manager: &ConnectionManager,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) {
        let mut rx = manager.subscribe();
        timeout(Duration::from_secs(2), rx.wait_for(predicate))
            .await
            .expect("state never reached")
            .unwrap();
    }

    #[tokio::test]
    async fn connect_join_send_and_ingest() {
        let h = loopback(settings(10));
        h.manager.connect().await.unwrap();
        assert!(h.manager.is_connected());

        assert_eq!(h.manager.join_channel("#Foo").await.unwrap(), "foo");
        assert_eq!(h.manager.channels(), vec!["foo".to_string()]);

        h.manager.send_message("foo", "hello chat").await.unwrap();
        assert_eq!(
            h.transport.sent_messages(),
            vec![("foo".to_string(), "hello chat".to_string())]
        );

        h.transport
            .inject(IncomingMessage {
                channel: "foo".into(),
                login: Some("ann".into()),
                text: "hi bot".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        h.transport
            .inject(IncomingMessage {
                channel: "foo".into(),
                login: Some("bob".into()),
                text: "yo".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        // Ingestion is ordered: once bob's line is in, ann's is too and the
        // bot's own echo was skipped.
        let store = h.store.clone();
        timeout(Duration::from_secs(2), async move {
            while store.message_count(Some("foo")) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let msgs = h.store.all_messages(Some("foo"));
        let users: Vec<_> = msgs.iter().map(|m| m.username.as_str()).collect();
        assert_eq!(users, ["ann", "bob"]);
    }

    #[tokio::test]
    async fn leave_channel_removes_it() {
        let h = loopback(settings(10));
        h.manager.connect().await.unwrap();
        h.manager.join_channel("foo").await.unwrap();
        h.manager.join_channel("bar").await.unwrap();
        h.manager.leave_channel("#FOO").await.unwrap();
        assert_eq!(h.manager.channels(), vec!["bar".to_string()]);
    }

    #[tokio::test]
    async fn default_channel_is_joined_on_connect() {
        let mut s = settings(10);
        s.default_channel = Some("streamer".into());
        let h = loopback(s);
        h.manager.connect().await.unwrap();
        wait_state(&h.manager, |s| s.joined_channels.contains("streamer")).await;
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected() {
        let h = loopback(settings(10));
        let err = h.manager.send_message("foo", "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::NotConnected));
        let err = h.manager.join_channel("foo").await.unwrap_err();
        assert!(matches!(err, ChatError::NotConnected));
    }

    #[tokio::test]
    async fn first_connect_failure_is_returned_not_retried() {
        let h = start(FlakyTransport::new, settings(1));
        let err = h.manager.connect().await.unwrap_err();
        assert!(err.is_connection_error());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.transport.connect_calls.load(Ordering::SeqCst), 1);
        let state = h.manager.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn reconnection_stops_at_cap_and_explicit_connect_resets() {
        let h = start(FlakyTransport::new, settings(1));
        h.manager.handle_event(ChatEvent::Disconnected {
            reason: "socket reset".into(),
        });

        wait_state(&h.manager, |s| {
            s.reconnect_attempts == 5 && !s.reconnect_pending
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.transport.connect_calls.load(Ordering::SeqCst), 5);
        let state = h.manager.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert!(!state.reconnect_pending);

        h.transport.fail_connect.store(false, Ordering::SeqCst);
        h.manager.connect().await.unwrap();
        assert_eq!(h.manager.state().reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn duplicate_disconnect_schedules_once() {
        let h = start(FlakyTransport::new, settings(60_000));
        for _ in 0..2 {
            h.manager.handle_event(ChatEvent::Disconnected {
                reason: "eof".into(),
            });
        }
        let state = h.manager.state();
        assert_eq!(state.reconnect_attempts, 1);
        assert!(state.reconnect_pending());
        assert_eq!(h.transport.connect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn explicit_disconnect_cancels_pending_reconnect() {
        let h = start(FlakyTransport::new, settings(20));
        h.manager.handle_event(ChatEvent::Disconnected {
            reason: "eof".into(),
        });
        h.manager.disconnect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(h.transport.connect_calls.load(Ordering::SeqCst), 0);
        assert!(!h.manager.state().reconnect_pending());
    }

    #[tokio::test]
    async fn disconnect_during_reconnect_handshake_wins() {
        let h = start(
            |tx| FlakyTransport::slow(tx, Duration::from_millis(50)),
            settings(1),
        );
        h.manager.handle_event(ChatEvent::Disconnected {
            reason: "eof".into(),
        });
        wait_state(&h.manager, |s| s.status == ConnectionStatus::Connecting).await;
        h.manager.disconnect().await.unwrap();

        // the handshake finishes and reports Connected after the disconnect
        tokio::time::sleep(Duration::from_millis(150)).await;
        let state = h.manager.state();
        assert_eq!(h.transport.connect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.reconnect_attempts, 1);
        assert!(state.joined_channels.is_empty());
        // once from disconnect(), again to close the late session
        assert!(h.transport.disconnect_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn drop_after_explicit_disconnect_is_not_retried() {
        let h = loopback(settings(1));
        h.manager.connect().await.unwrap();
        h.manager.join_channel("foo").await.unwrap();
        h.manager.disconnect().await.unwrap();
        assert!(h.manager.channels().is_empty());

        h.manager.handle_event(ChatEvent::Disconnected {
            reason: "late eof".into(),
        });
        let state = h.manager.state();
        assert_eq!(state.reconnect_attempts, 0);
        assert!(!state.reconnect_pending());
    }

    #[tokio::test]
    async fn unexpected_drop_reconnects_and_keeps_channels() {
        let h = loopback(settings(50));
        h.manager.connect().await.unwrap();
        h.manager.join_channel("foo").await.unwrap();

        h.transport.drop_connection("server restart").await.unwrap();
        wait_state(&h.manager, |s| s.reconnect_attempts == 1).await;
        wait_state(&h.manager, |s| {
            s.is_connected() && s.reconnect_attempts == 0
        })
        .await;
        assert_eq!(h.manager.channels(), vec!["foo".to_string()]);
    }

    #[tokio::test]
    async fn transport_send_failure_becomes_send_error() {
        let h = start(FlakyTransport::new, settings(1));
        h.transport.fail_connect.store(false, Ordering::SeqCst);
        h.manager.connect().await.unwrap();
        let err = h.manager.send_message("foo", "hi").await.unwrap_err();
        assert_eq!(err.code(), "SEND_ERROR");
        assert!(err.to_string().contains("rate limited"));

        let err = h.manager.join_channel("foo").await.unwrap_err();
        assert_eq!(err.code(), "CHANNEL_OPERATION_ERROR");
    }

    #[tokio::test]
    async fn hung_transport_call_times_out() {
        let mut s = settings(1);
        s.operation_timeout = Duration::from_millis(20);
        let h = start(FlakyTransport::new, s);
        h.transport.fail_connect.store(false, Ordering::SeqCst);
        h.transport.hang_say.store(true, Ordering::SeqCst);
        h.manager.connect().await.unwrap();

        let err = h.manager.send_message("foo", "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::Timeout { ms: 20 }));
    }
}
