use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use twitch_mcp_chat::irc::IrcSettings;
use twitch_mcp_chat::{
    ChatEvent, ChatTransport, ConnectionManager, ConnectionSettings, IrcTransport,
    LoopbackTransport,
};
use twitch_mcp_core::config::{TransportKind, TwitchMcpConfig};
use twitch_mcp_store::MessageStore;

/// Login used by the loopback transport when none is configured.
const LOOPBACK_LOGIN: &str = "twitch-mcp";

/// Central shared state, built once at startup.
pub struct AppState {
    pub config: TwitchMcpConfig,
    pub manager: Arc<ConnectionManager>,
}

impl AppState {
    /// Wire store, transport and connection manager from config.
    ///
    /// Returns the receiving end of the transport event queue; hand it to
    /// [`ConnectionManager::run`].
    pub fn new(config: TwitchMcpConfig) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.connection.event_buffer);

        let store = Arc::new(MessageStore::new(config.store.max_messages_per_channel));
        let transport = build_transport(&config, events_tx);
        let manager = Arc::new(ConnectionManager::new(
            transport,
            store,
            ConnectionSettings::from_config(&config),
        ));

        (Self { config, manager }, events_rx)
    }
}

fn build_transport(
    config: &TwitchMcpConfig,
    events: mpsc::Sender<ChatEvent>,
) -> Arc<dyn ChatTransport> {
    match config.twitch.transport {
        TransportKind::Irc => {
            let settings = IrcSettings::from_config(&config.twitch);
            info!(login = %settings.login, "using Twitch IRC transport (TLS)");
            Arc::new(IrcTransport::new(settings, events))
        }
        TransportKind::Loopback => {
            let login = match config.twitch.username.trim() {
                "" => LOOPBACK_LOGIN,
                name => name,
            };
            info!(login, "using loopback transport (offline)");
            Arc::new(LoopbackTransport::new(login, events))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_config_builds_a_working_manager() {
        let mut config = TwitchMcpConfig::default();
        config.twitch.transport = TransportKind::Loopback;
        config.twitch.channel = Some("#Streamer".into());
        config.store.max_messages_per_channel = 3;

        let (state, events) = AppState::new(config);
        assert_eq!(state.manager.store().max_per_channel(), 3);
        assert_eq!(
            state.manager.settings().default_channel.as_deref(),
            Some("streamer")
        );

        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(state.manager.clone().run(events, shutdown_rx));
        state.manager.connect().await.unwrap();
        assert!(state.manager.is_connected());
        state.manager.disconnect().await.unwrap();
        assert!(!state.manager.is_connected());
    }
}
