use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwitchMcpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid timestamp '{input}': expected RFC 3339, 'YYYY-MM-DD[ HH:MM:SS]' or epoch milliseconds")]
    InvalidTimestamp { input: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TwitchMcpError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            TwitchMcpError::Config(_) => "CONFIG_ERROR",
            TwitchMcpError::InvalidTimestamp { .. } => "INVALID_TIMESTAMP",
            TwitchMcpError::Serialization(_) => "SERIALIZATION_ERROR",
            TwitchMcpError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, TwitchMcpError>;
