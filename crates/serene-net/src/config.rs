use std::time::Duration;

use serene_shared::constants::{
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_HUB_URL, DEFAULT_INVOKE_TIMEOUT_SECS,
    DEFAULT_KEEP_ALIVE_SECS, DEFAULT_SERVER_TIMEOUT_SECS,
};

use crate::reconnect::ReconnectPolicy;

/// Settings for a [`crate::HubSession`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub endpoint, e.g. `https://api.example.com/chatHub`.
    pub hub_url: String,
    /// Connect straight to the websocket without calling `/negotiate`.
    pub skip_negotiation: bool,
    /// Backoff applied after the transport drops.
    pub reconnect: ReconnectPolicy,
    /// Interval between client pings.
    pub keep_alive_interval: Duration,
    /// Silence from the hub after which the transport is considered dead.
    pub server_timeout: Duration,
    /// Limit for negotiate, websocket connect and protocol handshake.
    pub handshake_timeout: Duration,
    /// Limit for an invocation's completion.
    pub invoke_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            skip_negotiation: false,
            reconnect: ReconnectPolicy::default(),
            keep_alive_interval: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            server_timeout: Duration::from_secs(DEFAULT_SERVER_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            invoke_timeout: Duration::from_secs(DEFAULT_INVOKE_TIMEOUT_SECS),
        }
    }
}

impl HubConfig {
    pub fn with_hub_url(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            ..Self::default()
        }
    }
}
