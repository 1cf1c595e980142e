use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use twitch_irc::login::StaticLoginCredentials;
use twitch_irc::message::{AsRawIRC, ServerMessage};
use twitch_irc::{ClientConfig, SecureTCPTransport, TwitchIRCClient};

use twitch_mcp_core::config::TwitchConfig;
use twitch_mcp_core::types::{normalize_channel, normalize_oauth_token};

use crate::{
    error::ChatError,
    irc::tags,
    transport::ChatTransport,
    types::{ChatEvent, IncomingMessage},
};

/// Only TLS is wired in: the login token never crosses the network in clear.
type Client = TwitchIRCClient<SecureTCPTransport, StaticLoginCredentials>;

const ENDPOINT: &str = "irc.chat.twitch.tv:6697";

/// Credentials for the IRC transport.
#[derive(Debug, Clone)]
pub struct IrcSettings {
    /// Bot login, lower-cased.
    pub login: String,
    /// Token in `oauth:<token>` form.
    pub oauth_token: String,
}

impl IrcSettings {
    pub fn new(login: &str, oauth_token: &str) -> Self {
        Self {
            login: login.trim().to_lowercase(),
            oauth_token: normalize_oauth_token(oauth_token),
        }
    }

    pub fn from_config(config: &TwitchConfig) -> Self {
        Self::new(&config.username, &config.oauth_token)
    }

    /// The client adds the `oauth:` prefix itself.
    fn credentials(&self) -> StaticLoginCredentials {
        let token = self
            .oauth_token
            .strip_prefix("oauth:")
            .unwrap_or(&self.oauth_token);
        StaticLoginCredentials::new(self.login.clone(), Some(token.to_string()))
    }
}

/// Live session: the client handle and the token that stops its event pump.
struct Session {
    client: Client,
    cancel: CancellationToken,
}

/// Twitch IRC transport backed by `twitch-irc`.
///
/// The client owns the socket: TLS, PING/PONG with a liveness timeout, and
/// transparent reconnects that rejoin wanted channels. Each connect spawns
/// one pump task that turns server messages into [`ChatEvent`]s. The session
/// only reports `Disconnected` when the client stops for good or Twitch
/// rejects the login after a transparent reconnect.
pub struct IrcTransport {
    settings: IrcSettings,
    events: mpsc::Sender<ChatEvent>,
    session: Mutex<Option<Session>>,
}

impl IrcTransport {
    pub fn new(settings: IrcSettings, events: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            settings,
            events,
            session: Mutex::new(None),
        }
    }

    async fn client(&self) -> Option<Client> {
        self.session
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.cancel.is_cancelled())
            .map(|s| s.client.clone())
    }
}

#[async_trait]
impl ChatTransport for IrcTransport {
    fn name(&self) -> &str {
        "irc"
    }

    async fn connect(&self) -> Result<(), ChatError> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            old.cancel.cancel();
        }

        info!(endpoint = ENDPOINT, login = %self.settings.login, "opening Twitch chat connection");
        let config = ClientConfig::new_simple(self.settings.credentials());
        let (incoming, client) = Client::new(config);

        let cancel = CancellationToken::new();
        // An abandoned login (caller timeout) must not surface as a drop.
        let abandon = cancel.clone().drop_guard();
        let (login_tx, login_rx) = oneshot::channel();
        tokio::spawn(pump(
            incoming,
            self.events.clone(),
            self.settings.login.clone(),
            login_tx,
            cancel.clone(),
        ));

        client.connect().await;
        let outcome = login_rx.await.unwrap_or_else(|_| {
            Err(ChatError::ConnectionFailed(
                "chat client stopped during login".into(),
            ))
        });
        if let Err(e) = outcome {
            warn!(error = %e, "Twitch chat login failed");
            return Err(e);
        }
        abandon.disarm();

        *session = Some(Session { client, cancel });
        drop(session);

        info!(login = %self.settings.login, "Twitch chat login accepted");
        self.events
            .send(ChatEvent::Connected)
            .await
            .map_err(|_| ChatError::ConnectionFailed("event queue closed".into()))
    }

    async fn disconnect(&self) -> Result<(), ChatError> {
        // Dropping the last client handle closes the socket.
        if let Some(session) = self.session.lock().await.take() {
            session.cancel.cancel();
            info!("Twitch chat connection closed");
        }
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<(), ChatError> {
        let channel = normalize_channel(channel);
        let op_err = |reason: String| ChatError::ChannelOperation {
            channel: channel.clone(),
            reason,
        };
        let client = self
            .client()
            .await
            .ok_or_else(|| op_err("not connected".into()))?;
        client
            .join(channel.clone())
            .map_err(|e| op_err(e.to_string()))
    }

    async fn part(&self, channel: &str) -> Result<(), ChatError> {
        let channel = normalize_channel(channel);
        let client = self.client().await.ok_or_else(|| ChatError::ChannelOperation {
            channel: channel.clone(),
            reason: "not connected".into(),
        })?;
        client.part(channel);
        Ok(())
    }

    async fn say(&self, channel: &str, text: &str) -> Result<(), ChatError> {
        let text = single_line(text);
        if text.trim().is_empty() {
            return Err(ChatError::SendFailed("message text is empty".into()));
        }
        let client = self.client().await.ok_or(ChatError::NotConnected)?;
        client
            .say(normalize_channel(channel), text)
            .await
            .map_err(|e| ChatError::SendFailed(e.to_string()))
    }
}

type LoginOutcome = oneshot::Sender<Result<(), ChatError>>;

/// Forward server messages until cancelled.
///
/// The first `GLOBALUSERSTATE` (or a login NOTICE) settles `login`. After
/// that, a closed stream or a rejected re-login is reported as `Disconnected`.
async fn pump(
    mut incoming: mpsc::UnboundedReceiver<ServerMessage>,
    events: mpsc::Sender<ChatEvent>,
    login: String,
    login_outcome: LoginOutcome,
    cancel: CancellationToken,
) {
    let mut login_outcome = Some(login_outcome);
    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = incoming.recv() => next,
        };
        let Some(message) = next else {
            break "chat client stopped".to_string();
        };
        match interpret(message, &login) {
            Inbound::Event(event) => {
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Inbound::LoggedIn => {
                if let Some(tx) = login_outcome.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Inbound::LoginRejected(notice) => match login_outcome.take() {
                Some(tx) => {
                    let _ = tx.send(Err(ChatError::AuthFailed(notice)));
                    return;
                }
                None => break format!("login rejected on reconnect: {notice}"),
            },
            Inbound::Ignore => {}
        }
    };

    if let Some(tx) = login_outcome.take() {
        let _ = tx.send(Err(ChatError::ConnectionFailed(reason)));
        return;
    }
    cancel.cancel();
    warn!(reason = %reason, "Twitch chat session dropped");
    let _ = events.send(ChatEvent::Disconnected { reason }).await;
}

/// What the pump should do with one server message.
#[derive(Debug, PartialEq)]
enum Inbound {
    Event(ChatEvent),
    LoggedIn,
    LoginRejected(String),
    Ignore,
}

fn interpret(message: ServerMessage, login: &str) -> Inbound {
    match message {
        ServerMessage::Privmsg(msg) => {
            let tags = tags::metadata(&msg.source.as_raw_irc());
            Inbound::Event(ChatEvent::Message(IncomingMessage {
                channel: normalize_channel(&msg.channel_login),
                is_self: msg.sender.login.eq_ignore_ascii_case(login),
                login: Some(msg.sender.login),
                display_name: Some(msg.sender.name).filter(|n| !n.is_empty()),
                text: msg.message_text,
                id: Some(msg.message_id).filter(|id| !id.is_empty()),
                tags,
            }))
        }
        ServerMessage::Join(msg) if msg.user_login.eq_ignore_ascii_case(login) => {
            Inbound::Event(ChatEvent::Joined {
                channel: normalize_channel(&msg.channel_login),
            })
        }
        ServerMessage::Part(msg) if msg.user_login.eq_ignore_ascii_case(login) => {
            Inbound::Event(ChatEvent::Parted {
                channel: normalize_channel(&msg.channel_login),
            })
        }
        ServerMessage::GlobalUserState(_) => Inbound::LoggedIn,
        ServerMessage::Notice(notice) => {
            if notice.channel_login.is_none() && is_login_failure(&notice.message_text) {
                return Inbound::LoginRejected(notice.message_text);
            }
            info!(
                channel = notice.channel_login.as_deref().unwrap_or("*"),
                notice = %notice.message_text,
                msg_id = notice.message_id.as_deref().unwrap_or_default(),
                "server notice"
            );
            Inbound::Ignore
        }
        ServerMessage::Reconnect(_) => {
            debug!("server requested reconnect; client reconnects and rejoins");
            Inbound::Ignore
        }
        _ => Inbound::Ignore,
    }
}

fn is_login_failure(notice: &str) -> bool {
    let notice = notice.to_ascii_lowercase();
    notice.contains("login authentication failed")
        || notice.contains("improperly formatted auth")
        || notice.contains("login unsuccessful")
}

/// Collapse CR/LF so a chat message cannot smuggle extra IRC commands.
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}
