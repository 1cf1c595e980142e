pub mod config;
pub mod error;
pub mod types;

pub use config::TwitchMcpConfig;
pub use error::{Result, TwitchMcpError};
pub use types::{ChatMessage, MessageFilter};
