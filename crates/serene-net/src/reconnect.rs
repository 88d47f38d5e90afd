//! Reconnect backoff.
//!
//! Mirrors the SignalR client's default automatic-reconnect schedule: retry
//! immediately, then after 2, 10 and 30 seconds, then give up.

use std::time::Duration;

use serene_shared::constants::DEFAULT_RECONNECT_DELAYS_MS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
}

impl ReconnectPolicy {
    /// A policy that waits `delays[n]` before the n-th retry.
    pub fn from_delays(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Never reconnect; a dropped transport ends the session.
    pub fn disabled() -> Self {
        Self { delays: Vec::new() }
    }

    /// Delay before retry number `attempt` (zero-based), or `None` once the
    /// schedule is exhausted.
    pub fn next_delay(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }

    pub fn is_enabled(&self) -> bool {
        !self.delays.is_empty()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_delays(
            DEFAULT_RECONNECT_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }
}
