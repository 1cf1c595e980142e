pub mod error;
pub mod irc;
pub mod loopback;
pub mod manager;
pub mod transport;
pub mod types;

pub use error::ChatError;
pub use irc::IrcTransport;
pub use loopback::LoopbackTransport;
pub use manager::{ConnectionManager, ConnectionSettings};
pub use transport::ChatTransport;
pub use types::{ChatEvent, ConnectionState, ConnectionStatus, IncomingMessage};
