//! Twitch chat over IRC: TLS on port 6697 through the `twitch-irc` client.

pub mod tags;
pub mod transport;

pub use transport::{IrcSettings, IrcTransport};
