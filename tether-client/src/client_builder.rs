//! Fluent construction of a [`Client`]
//!
//! The builder covers every [`ClientConfig`] field plus the pieces that are
//! not plain settings: the reconnection strategy, the transport, and
//! observability.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> tether_core::Result<()> {
//! // Defaults: 30 s requests, 5 attempts from 1 s
//! let client = ClientBuilder::new("ws://localhost:8080").connect().await?;
//!
//! // Tuned, with jittered backoff and metrics
//! let client2 = ClientBuilder::new("wss://assistant.example.com/ws")
//!     .token("secret")
//!     .request_timeout(Duration::from_secs(10))
//!     .with_reconnect(Box::new(
//!         ExponentialBackoff::new(Duration::from_millis(500))
//!             .with_max_attempts(8)
//!             .with_max_delay(Duration::from_secs(30))
//!             .with_jitter(),
//!     ))
//!     .with_default_observability()
//!     .service_name("order-assistant")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::client::default_strategy;
use crate::reconnect::{NoReconnect, ReconnectionStrategy};
use crate::transport::{Transport, WebSocketTransport};
use crate::{Client, ClientConfig, ClientMetrics};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{ObservabilityConfig, Result};

/// Builder for configuring and creating a [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    transport: Option<Box<dyn Transport>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    metrics: bool,
}

impl ClientBuilder {
    /// Defaults for `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::from_config(ClientConfig::new(endpoint))
    }

    /// Start from an existing configuration, e.g. [`ClientConfig::from_env`]
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            reconnect_strategy: None,
            transport: None,
            observability_config: None,
            service_name: None,
            metrics: false,
        }
    }

    /// Bearer credential for the upgrade request
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Default deadline for each request
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Deadline for the open handshake
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Attempts made by the default backoff before giving up
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// First delay of the default backoff
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_base_delay = delay;
        self
    }

    /// Period between liveness probes; `Duration::ZERO` disables them
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Force a reconnection after this many consecutive failed probes
    pub fn heartbeat_max_failures(mut self, failures: u32) -> Self {
        self.config.heartbeat_max_failures = Some(failures);
        self
    }

    /// Reconnect with a custom strategy instead of the configured backoff
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self.config.auto_reconnect = true;
        self
    }

    /// Never reconnect; abnormal closures end in `Disconnected`
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect_strategy = Some(Box::new(NoReconnect));
        self.config.auto_reconnect = false;
        self
    }

    /// Replace the WebSocket transport
    pub fn with_transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Install logging and OpenTelemetry export when building; enables metrics
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self.metrics = true;
        self
    }

    /// [`with_observability`](Self::with_observability) with default settings
    pub fn with_default_observability(self) -> Self {
        self.with_observability(ObservabilityConfig::default())
    }

    /// Record client metrics on the global meter without installing anything
    pub fn with_metrics(mut self) -> Self {
        self.metrics = true;
        self
    }

    /// Service name for telemetry
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Create the client without connecting
    pub fn build(self) -> Client {
        let mut service_name = self
            .service_name
            .clone()
            .unwrap_or_else(|| ObservabilityConfig::default().service_name);

        if let Some(mut obs) = self.observability_config {
            if let Some(name) = self.service_name {
                obs.service_name = name;
            }
            service_name = obs.service_name.clone();

            // Usually another subscriber is already installed; the client
            // still works and logs through that one.
            if let Err(e) = tether_core::init_observability(obs) {
                tracing::warn!(error = %e, "Observability not initialized");
            }
        }

        let metrics = self
            .metrics
            .then(|| Arc::new(ClientMetrics::new(service_name)));

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| default_strategy(&self.config));
        let transport = self
            .transport
            .unwrap_or_else(|| Box::new(WebSocketTransport));

        Client::from_parts(self.config, transport, strategy, metrics)
    }

    /// Build the client and connect it
    pub async fn connect(self) -> Result<Client> {
        let client = self.build();
        client.connect().await?;
        Ok(client)
    }
}
