use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

mod app;
mod mcp_bridge;
pub mod tools;

#[derive(Parser)]
#[command(name = "twitch-mcp")]
#[command(version, about = "MCP server exposing Twitch chat as tools over stdio")]
#[command(long_about = "Connects to Twitch chat, records what it sees and serves \
MCP tools (sendMessage, joinChannel, getRecentMessages, filterMessages, \
getAllMessages, getStatus) over stdin/stdout.\n\n\
Environment Variables:\n\
  TWITCH_USERNAME      Bot login\n\
  TWITCH_OAUTH_TOKEN   Chat token, with or without the oauth: prefix\n\
  TWITCH_CHANNEL       Channel to join on connect (optional)\n\
  TWITCH_MCP_CONFIG    Config file path (default ~/.twitch-mcp/twitch-mcp.toml)\n\
  RUST_LOG             Log filter (logs go to stderr)")]
struct Args {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout is the JSON-RPC stream; logs must stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twitch_mcp=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // load config: --config > TWITCH_MCP_CONFIG env > ~/.twitch-mcp/twitch-mcp.toml
    let config_path = args
        .config
        .or_else(|| std::env::var("TWITCH_MCP_CONFIG").ok());
    let config = twitch_mcp_core::config::TwitchMcpConfig::load(config_path.as_deref())
        .context("invalid configuration")?;

    let (state, events) = app::AppState::new(config);
    let manager = state.manager.clone();

    // spawn the single consumer of transport events
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let event_loop = tokio::spawn(manager.clone().run(events, shutdown_rx));

    manager
        .connect()
        .await
        .context("failed to connect to Twitch chat")?;
    if let Some(ref channel) = state.config.twitch.channel {
        info!(channel = %channel, "default channel will be joined on connect");
    }

    let bridge = mcp_bridge::McpBridge::new(tools::ToolDispatcher::new(manager.clone()));
    info!("MCP server ready on stdio");

    let served = tokio::select! {
        res = bridge.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            Ok(())
        }
    };

    // close the chat session before exiting so it is not left half-open
    if let Err(e) = manager.disconnect().await {
        warn!(error = %e, "disconnect during shutdown failed");
    }
    let _ = shutdown_tx.send(true);
    let _ = event_loop.await;

    served.context("MCP stdio loop failed")?;
    Ok(())
}
