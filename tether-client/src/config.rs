//! Client configuration
//!
//! A [`ClientConfig`] is fixed once the client is built. It can be assembled
//! in code, through [`ClientBuilder`](crate::ClientBuilder), or read from the
//! environment:
//!
//! | Variable                        | Field                     |
//! |---------------------------------|---------------------------|
//! | `TETHER_URL` (required)         | `endpoint`                |
//! | `TETHER_TOKEN`                  | `token`                   |
//! | `TETHER_REQUEST_TIMEOUT_MS`     | `request_timeout`         |
//! | `TETHER_MAX_RECONNECT_ATTEMPTS` | `max_reconnect_attempts`  |
//! | `TETHER_RECONNECT_DELAY_MS`     | `reconnect_base_delay`    |
//! | `TETHER_CONNECT_TIMEOUT_MS`     | `connect_timeout`         |
//! | `TETHER_AUTO_RECONNECT`         | `auto_reconnect`          |
//! | `TETHER_HEARTBEAT_INTERVAL_MS`  | `heartbeat_interval`      |

use std::str::FromStr;
use std::time::Duration;
use tether_core::{Error, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Settings for one logical connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint, `ws://` or `wss://`
    pub endpoint: String,
    /// Bearer credential sent on the upgrade request
    pub token: Option<String>,
    /// Deadline for each correlated request
    pub request_timeout: Duration,
    /// Reconnection attempts before settling in the error state
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt; doubles per attempt
    pub reconnect_base_delay: Duration,
    /// Deadline for the open handshake
    pub connect_timeout: Duration,
    /// Reconnect after abnormal closure
    pub auto_reconnect: bool,
    /// Period between liveness probes; zero disables heartbeats
    pub heartbeat_interval: Duration,
    /// Consecutive probe failures that force a reconnection.
    /// `None` keeps heartbeats diagnostic only.
    pub heartbeat_max_failures: Option<u32>,
}

impl ClientConfig {
    /// Defaults for the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auto_reconnect: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_max_failures: None,
        }
    }

    /// Read the configuration from `TETHER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let endpoint = lookup("TETHER_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::TransportUnavailable("TETHER_URL is not set".to_string()))?;

        let mut config = Self::new(endpoint);
        config.token = lookup("TETHER_TOKEN").filter(|t| !t.is_empty());

        if let Some(ms) = parse_var::<u64>(&lookup, "TETHER_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "TETHER_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TETHER_RECONNECT_DELAY_MS") {
            config.reconnect_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TETHER_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = parse_var::<bool>(&lookup, "TETHER_AUTO_RECONNECT") {
            config.auto_reconnect = enabled;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TETHER_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "Ignoring unparsable setting, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("ws://localhost:3001");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.auto_reconnect);
        assert!(config.token.is_none());
        assert!(config.heartbeat_max_failures.is_none());
    }

    #[test]
    fn test_from_lookup_full() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("TETHER_URL", "wss://example.com/ws"),
            ("TETHER_TOKEN", "secret"),
            ("TETHER_REQUEST_TIMEOUT_MS", "2000"),
            ("TETHER_MAX_RECONNECT_ATTEMPTS", "3"),
            ("TETHER_RECONNECT_DELAY_MS", "500"),
            ("TETHER_CONNECT_TIMEOUT_MS", "750"),
            ("TETHER_AUTO_RECONNECT", "false"),
            ("TETHER_HEARTBEAT_INTERVAL_MS", "10000"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, "wss://example.com/ws");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.request_timeout, Duration::from_millis(2000));
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(500));
        assert_eq!(config.connect_timeout, Duration::from_millis(750));
        assert!(!config.auto_reconnect);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_requires_url() {
        let err = ClientConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("TETHER_URL"));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("TETHER_URL", "ws://localhost:3001"),
            ("TETHER_MAX_RECONNECT_ATTEMPTS", "many"),
            ("TETHER_AUTO_RECONNECT", "sometimes"),
        ]))
        .unwrap();

        assert_eq!(config.max_reconnect_attempts, 5);
        assert!(config.auto_reconnect);
    }
}
