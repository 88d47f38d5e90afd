//! Client configuration loaded from environment variables.
//!
//! All settings have defaults pointing at a local backend, so the client can
//! start with zero configuration during development.

use std::time::Duration;

use serene_net::HubConfig;
use serene_shared::constants::{
    DEFAULT_API_URL, DEFAULT_HISTORY_LIMIT, DEFAULT_HUB_URL, DEFAULT_INVOKE_TIMEOUT_SECS,
};
use serene_shared::UserId;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Realtime hub endpoint.
    /// Env: `SERENE_HUB_URL`
    /// Default: `http://localhost:5000/chatHub`
    pub hub_url: String,

    /// Base URL of the REST API.
    /// Env: `SERENE_API_URL`
    /// Default: `http://localhost:5000`
    pub api_url: String,

    /// Skip the negotiate round trip (websocket-only hubs).
    /// Env: `SERENE_SKIP_NEGOTIATION` (true/false)
    /// Default: `false`
    pub skip_negotiation: bool,

    /// How long to wait for a hub invocation to complete.
    /// Env: `SERENE_INVOKE_TIMEOUT_SECS`
    /// Default: `30`
    pub invoke_timeout: Duration,

    /// Messages kept in memory per channel.
    /// Env: `SERENE_HISTORY_LIMIT`
    /// Default: `500`
    pub history_limit: usize,

    /// User to log in as without prompting.
    /// Env: `SERENE_USER_ID`
    /// Default: none.
    pub user_id: Option<UserId>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: DEFAULT_HUB_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            skip_negotiation: false,
            invoke_timeout: Duration::from_secs(DEFAULT_INVOKE_TIMEOUT_SECS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            user_id: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("SERENE_HUB_URL") {
            if !url.trim().is_empty() {
                config.hub_url = url.trim().to_string();
            }
        }

        if let Some(url) = var("SERENE_API_URL") {
            if !url.trim().is_empty() {
                config.api_url = url.trim().to_string();
            }
        }

        if let Some(val) = var("SERENE_SKIP_NEGOTIATION") {
            config.skip_negotiation = val == "true" || val == "1";
        }

        if let Some(val) = var("SERENE_INVOKE_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.invoke_timeout = Duration::from_secs(secs),
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid SERENE_INVOKE_TIMEOUT_SECS, using default"
                    );
                }
            }
        }

        if let Some(val) = var("SERENE_HISTORY_LIMIT") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.history_limit = n,
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid SERENE_HISTORY_LIMIT, using default"
                    );
                }
            }
        }

        if let Some(id) = var("SERENE_USER_ID") {
            if !id.trim().is_empty() {
                config.user_id = Some(UserId::new(id.trim()));
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// Hub session settings derived from this configuration.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            skip_negotiation: self.skip_negotiation,
            invoke_timeout: self.invoke_timeout,
            ..HubConfig::with_hub_url(self.hub_url.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::from_vars(vars(&[]));
        assert_eq!(config.hub_url, "http://localhost:5000/chatHub");
        assert_eq!(config.api_url, "http://localhost:5000");
        assert!(!config.skip_negotiation);
        assert_eq!(config.history_limit, 500);
        assert_eq!(config.user_id, None);
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_vars(vars(&[
            ("SERENE_HUB_URL", "https://chat.example.com/chatHub"),
            ("SERENE_SKIP_NEGOTIATION", "true"),
            ("SERENE_INVOKE_TIMEOUT_SECS", "5"),
            ("SERENE_HISTORY_LIMIT", "50"),
            ("SERENE_USER_ID", " 7 "),
        ]));
        assert_eq!(config.hub_url, "https://chat.example.com/chatHub");
        assert!(config.skip_negotiation);
        assert_eq!(config.invoke_timeout, Duration::from_secs(5));
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.user_id, Some(UserId::from("7")));

        let hub = config.hub_config();
        assert!(hub.skip_negotiation);
        assert_eq!(hub.invoke_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_vars(vars(&[
            ("SERENE_INVOKE_TIMEOUT_SECS", "soon"),
            ("SERENE_HISTORY_LIMIT", "0"),
        ]));
        assert_eq!(config.invoke_timeout, Duration::from_secs(30));
        assert_eq!(config.history_limit, 500);
    }
}
