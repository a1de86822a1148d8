//! Builder for [`RealtimeClient`]
//!
//! The `RealtimeClientBuilder` configures heartbeats, reconnection and
//! observability before the client is created. Reconnection uses
//! exponential backoff derived from [`RealtimeConfig`] unless another
//! [`ReconnectionStrategy`] is supplied.
//!
//! # Examples
//!
//! ```rust,no_run
//! use plotline_realtime::{FixedDelay, RealtimeClientBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> plotline_core::Result<()> {
//! // Default backoff: 1s growing by 1.5x up to 30s, 10 attempts
//! let client = RealtimeClientBuilder::new("ws://localhost:8080/ws")
//!     .heartbeat_interval(Duration::from_secs(15))
//!     .connect()
//!     .await?;
//!
//! // Fixed delay with observability
//! let client2 = RealtimeClientBuilder::new("wss://api.example.com/ws")
//!     .with_reconnect(Box::new(FixedDelay::new(Duration::from_secs(2))))
//!     .with_default_observability()
//!     .service_name("editor-realtime")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::client::RealtimeClient;
use crate::metrics::RealtimeMetrics;
use crate::reconnect::{ExponentialBackoff, NoReconnect, ReconnectionStrategy};
use plotline_core::{system_clock, Error, ObservabilityConfig, Result, SharedClock};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Deserializable realtime settings, durations in milliseconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Time between pings; zero disables the heartbeat
    #[serde(with = "plotline_core::serde_ms")]
    pub heartbeat_interval: Duration,
    /// How long a ping may go unanswered
    #[serde(with = "plotline_core::serde_ms")]
    pub heartbeat_timeout: Duration,
    /// Delay before the first reconnection attempt
    #[serde(with = "plotline_core::serde_ms")]
    pub reconnect_interval: Duration,
    pub reconnect_decay: f64,
    #[serde(with = "plotline_core::serde_ms")]
    pub max_reconnect_interval: Duration,
    /// `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    #[serde(with = "plotline_core::serde_ms")]
    pub connect_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_millis(1000),
            reconnect_decay: 1.5,
            max_reconnect_interval: Duration::from_secs(30),
            max_reconnect_attempts: Some(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RealtimeConfig {
    /// Backoff strategy described by the reconnect settings
    pub fn backoff(&self) -> ExponentialBackoff {
        let backoff = ExponentialBackoff::new(self.reconnect_interval, self.max_reconnect_interval)
            .with_decay(self.reconnect_decay);
        match self.max_reconnect_attempts {
            Some(max) => backoff.with_max_attempts(max),
            None => backoff.unlimited(),
        }
    }
}

/// Builder for configuring and creating a [`RealtimeClient`]
pub struct RealtimeClientBuilder {
    url: String,
    config: RealtimeConfig,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    clock: Option<SharedClock>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl RealtimeClientBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_config(url, RealtimeConfig::default())
    }

    pub fn from_config(url: impl Into<String>, config: RealtimeConfig) -> Self {
        Self {
            url: url.into(),
            config,
            reconnect_strategy: None,
            clock: None,
            observability_config: None,
            service_name: None,
        }
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Stop sending pings
    pub fn without_heartbeat(mut self) -> Self {
        self.config.heartbeat_interval = Duration::ZERO;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    pub fn reconnect_decay(mut self, decay: f64) -> Self {
        self.config.reconnect_decay = decay;
        self
    }

    pub fn max_reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.max_reconnect_interval = interval;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Replace the configured backoff with a custom strategy
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Never reconnect after an abnormal closure
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect_strategy = Some(Box::new(NoReconnect));
        self
    }

    /// Clock used for heartbeats and reconnect delays
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Create the client without connecting
    ///
    /// Fails when the URL is not `ws://` or `wss://`, or when observability
    /// is enabled and cannot be initialized.
    pub fn build(self) -> Result<RealtimeClient> {
        let url = self.url.trim().to_string();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) || url.ends_with("://") {
            return Err(Error::InvalidUrl(format!(
                "expected a ws:// or wss:// URL, got {:?}",
                self.url
            )));
        }

        let metrics = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                plotline_core::init_observability(config.clone()).map_err(|e| {
                    Error::Internal(format!("Failed to initialize observability: {}", e))
                })?;
                Some(Arc::new(RealtimeMetrics::new(config.service_name)))
            }
            None => None,
        };

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| Box::new(self.config.backoff()));
        let clock = self.clock.unwrap_or_else(system_clock);

        Ok(RealtimeClient::from_parts(url, self.config, strategy, clock, metrics))
    }

    /// Create the client and open the connection
    pub async fn connect(self) -> Result<RealtimeClient> {
        let client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}
