/// Terminates every record of the JSON hub protocol.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub protocol negotiated during the handshake.
pub const HUB_PROTOCOL: &str = "json";

/// Hub protocol version negotiated during the handshake.
pub const HUB_PROTOCOL_VERSION: u32 = 1;

/// Negotiate endpoint version requested by the client.
pub const NEGOTIATE_VERSION: u32 = 1;

/// Upper bound on negotiate redirects before giving up.
pub const MAX_NEGOTIATE_REDIRECTS: usize = 100;

/// Hub method: send a message to a channel group.
pub const METHOD_SEND_MESSAGE_TO_CHANNEL: &str = "SendMessageToChannel";

/// Hub method: add the current connection to a channel group.
pub const METHOD_JOIN_CHANNEL: &str = "JoinChannel";

/// Client method pushed by the hub for every channel message.
pub const EVENT_RECEIVE_CHANNEL_MESSAGE: &str = "receiveChannelMessage";

/// Hub endpoint used when none is configured.
pub const DEFAULT_HUB_URL: &str = "http://localhost:5000/chatHub";

/// REST API base used when none is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Client keep-alive ping interval in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;

/// Seconds without any inbound record before the transport is considered dead.
pub const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 30;

/// Seconds to wait for an invocation completion.
pub const DEFAULT_INVOKE_TIMEOUT_SECS: u64 = 30;

/// Seconds allowed for websocket connect plus protocol handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 15;

/// Reconnect backoff, in milliseconds (SignalR client defaults).
pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];

/// Messages retained per channel in memory.
pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// Message types understood by the chat views.
pub const MESSAGE_TYPE_TEXT: &str = "text";
pub const MESSAGE_TYPE_IMAGE: &str = "image";
pub const MESSAGE_TYPE_FILE: &str = "file";
