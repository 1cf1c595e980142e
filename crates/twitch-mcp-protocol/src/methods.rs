// Well-known MCP method names.

// lifecycle
pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "notifications/initialized";
pub const PING: &str = "ping";

// tools
pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";

// Tool names exposed in the manifest.
pub const SEND_MESSAGE: &str = "sendMessage";
pub const JOIN_CHANNEL: &str = "joinChannel";
pub const GET_RECENT_MESSAGES: &str = "getRecentMessages";
pub const FILTER_MESSAGES: &str = "filterMessages";
pub const GET_ALL_MESSAGES: &str = "getAllMessages";
pub const GET_STATUS: &str = "getStatus";

/// Every tool name, in manifest order.
pub const TOOL_NAMES: [&str; 6] = [
    SEND_MESSAGE,
    JOIN_CHANNEL,
    GET_RECENT_MESSAGES,
    FILTER_MESSAGES,
    GET_ALL_MESSAGES,
    GET_STATUS,
];
