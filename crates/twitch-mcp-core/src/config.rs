use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TwitchMcpError};

pub const DEFAULT_MAX_MESSAGES_PER_CHANNEL: usize = 1000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5; // fixed, not exponential
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Top-level config (twitch-mcp.toml + TWITCH_MCP_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwitchMcpConfig {
    #[serde(default)]
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Which chat transport the connection manager drives.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Twitch IRC over TLS.
    #[default]
    Irc,
    /// In-process transport that acknowledges everything; no network.
    Loopback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitchConfig {
    /// Bot login name.
    #[serde(default)]
    pub username: String,
    /// Bearer token, with or without the `oauth:` prefix.
    #[serde(default)]
    pub oauth_token: String,
    /// Channel joined automatically once connected.
    pub channel: Option<String>,
    #[serde(default)]
    pub transport: TransportKind,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            oauth_token: String::new(),
            channel: None,
            transport: TransportKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages_per_channel: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_messages_per_channel: default_max_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Upper bound for any single transport operation (connect, send, join, part).
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Capacity of the transport → core event queue.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            operation_timeout_ms: default_operation_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES_PER_CHANNEL
}
fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}
fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY_SECS
}
fn default_operation_timeout_ms() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_MS
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl TwitchMcpConfig {
    /// Load config from a TOML file with env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.twitch-mcp/twitch-mcp.toml
    ///
    /// A missing file is fine. `TWITCH_MCP_<SECTION>__<KEY>` overrides any key;
    /// `TWITCH_USERNAME`, `TWITCH_OAUTH_TOKEN` and `TWITCH_CHANNEL` fill the
    /// `[twitch]` section.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        if std::path::Path::new(&path).exists() {
            debug!(path = %path, "loading config file");
        } else {
            debug!(path = %path, "config file not found, using defaults and environment");
        }

        let config: TwitchMcpConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(twitch_env())
            .merge(Env::prefixed("TWITCH_MCP_").split("__"))
            .extract()
            .map_err(|e| TwitchMcpError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the core cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.twitch.transport == TransportKind::Irc {
            if self.twitch.username.trim().is_empty() {
                return Err(TwitchMcpError::Config(
                    "twitch.username is required (or set TWITCH_USERNAME)".into(),
                ));
            }
            if self.twitch.oauth_token.trim().is_empty() {
                return Err(TwitchMcpError::Config(
                    "twitch.oauth_token is required (or set TWITCH_OAUTH_TOKEN)".into(),
                ));
            }
        }
        if self.store.max_messages_per_channel == 0 {
            return Err(TwitchMcpError::Config(
                "store.max_messages_per_channel must be at least 1".into(),
            ));
        }
        if self.connection.operation_timeout_ms == 0 {
            return Err(TwitchMcpError::Config(
                "connection.operation_timeout_ms must be positive".into(),
            ));
        }
        if self.connection.event_buffer == 0 {
            return Err(TwitchMcpError::Config(
                "connection.event_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// The unprefixed variables most Twitch bot setups already export.
fn twitch_env() -> Env {
    Env::raw().filter_map(|key| {
        let mapped = match key.as_str() {
            "TWITCH_USERNAME" => "twitch.username",
            "TWITCH_OAUTH_TOKEN" => "twitch.oauth_token",
            "TWITCH_CHANNEL" => "twitch.channel",
            _ => return None,
        };
        Some(mapped.into())
    })
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.twitch-mcp/twitch-mcp.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = TwitchMcpConfig::default();
        assert_eq!(cfg.store.max_messages_per_channel, 1000);
        assert_eq!(cfg.connection.max_reconnect_attempts, 5);
        assert_eq!(cfg.connection.reconnect_delay_secs, 5);
        assert_eq!(cfg.twitch.transport, TransportKind::Irc);
    }

    #[test]
    fn irc_transport_requires_credentials() {
        let cfg = TwitchMcpConfig::default();
        assert!(cfg.validate().is_err());

        let mut cfg = TwitchMcpConfig::default();
        cfg.twitch.transport = TransportKind::Loopback;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_history_bound_is_rejected() {
        let mut cfg = TwitchMcpConfig::default();
        cfg.twitch.transport = TransportKind::Loopback;
        cfg.store.max_messages_per_channel = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_messages_per_channel"));
    }

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[twitch]
username = "mybot"
oauth_token = "abc"
channel = "SomeChannel"

[store]
max_messages_per_channel = 50

[connection]
reconnect_delay_secs = 2
"#
        )
        .unwrap();

        // Jail serializes env access with the override tests.
        figment::Jail::expect_with(|_jail| {
            let cfg = TwitchMcpConfig::load(file.path().to_str()).map_err(|e| e.to_string())?;
            assert_eq!(cfg.twitch.username, "mybot");
            assert_eq!(cfg.twitch.channel.as_deref(), Some("SomeChannel"));
            assert_eq!(cfg.store.max_messages_per_channel, 50);
            assert_eq!(cfg.connection.reconnect_delay_secs, 2);
            assert_eq!(cfg.connection.max_reconnect_attempts, 5);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_the_config_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "twitch-mcp.toml",
                r#"
[twitch]
username = "filebot"
oauth_token = "oauth:file"
channel = "filechannel"

[connection]
max_reconnect_attempts = 2
reconnect_delay_secs = 3
"#,
            )?;
            jail.set_env("TWITCH_USERNAME", "envbot");
            jail.set_env("TWITCH_OAUTH_TOKEN", "oauth:tok");
            jail.set_env("TWITCH_CHANNEL", "envchannel");
            jail.set_env("TWITCH_MCP_CONNECTION__MAX_RECONNECT_ATTEMPTS", "7");
            jail.set_env("TWITCH_MCP_STORE__MAX_MESSAGES_PER_CHANNEL", "25");

            let cfg = TwitchMcpConfig::load(Some("twitch-mcp.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.twitch.username, "envbot");
            assert_eq!(cfg.twitch.oauth_token, "oauth:tok");
            assert_eq!(cfg.twitch.channel.as_deref(), Some("envchannel"));
            assert_eq!(cfg.connection.max_reconnect_attempts, 7);
            assert_eq!(cfg.store.max_messages_per_channel, 25);
            // untouched file values survive
            assert_eq!(cfg.connection.reconnect_delay_secs, 3);
            Ok(())
        });
    }

    #[test]
    fn environment_alone_satisfies_credentials() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TWITCH_USERNAME", "envbot");
            jail.set_env("TWITCH_OAUTH_TOKEN", "abc");
            let cfg = TwitchMcpConfig::load(Some("missing.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.twitch.username, "envbot");
            assert_eq!(cfg.twitch.transport, TransportKind::Irc);
            Ok(())
        });
    }
}
