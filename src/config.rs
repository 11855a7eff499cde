//! Configuration for the streaming client

use anyhow::Context;
use std::env;
use std::fmt;
use std::time::Duration;

/// Default streaming endpoint
pub const STREAMING_API_URL: &str = "wss://invest-public-api.tinkoff.ru/openapi/md/v1/md-openapi/ws";

pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ping/pong liveness settings
///
/// `ping_period` should be shorter than `pong_wait`, otherwise the read
/// deadline expires before the peer ever gets a chance to answer a ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    enabled: bool,
    pong_wait: Duration,
    ping_period: Duration,
}

impl KeepaliveConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
        }
    }

    /// Enabled with the default 60s/54s timings
    pub fn enabled() -> Self {
        Self::new(DEFAULT_PONG_WAIT, DEFAULT_PING_PERIOD)
    }

    pub fn new(pong_wait: Duration, ping_period: Duration) -> Self {
        Self {
            enabled: true,
            pong_wait,
            ping_period,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pong_wait(&self) -> Duration {
        self.pong_wait
    }

    pub fn ping_period(&self) -> Duration {
        self.ping_period
    }

    pub fn is_consistent(&self) -> bool {
        self.ping_period < self.pong_wait
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Connection settings
#[derive(Clone)]
pub struct StreamingConfig {
    /// WebSocket endpoint
    pub endpoint: String,

    /// Bearer token sent in the handshake
    pub token: String,

    pub keepalive: KeepaliveConfig,

    /// Upper bound for the opening handshake
    pub handshake_timeout: Duration,
}

impl StreamingConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            endpoint: STREAMING_API_URL.to_string(),
            token: token.into(),
            keepalive: KeepaliveConfig::disabled(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let token = env::var("INVEST_TOKEN").context("INVEST_TOKEN is not set")?;

        let mut config = Self::new(token);
        if let Ok(endpoint) = env::var("STREAMING_ENDPOINT") {
            config.endpoint = endpoint;
        }

        let enabled = env::var("KEEPALIVE_ENABLED")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if enabled {
            let pong_wait = secs_var("PONG_WAIT_SECS", DEFAULT_PONG_WAIT)?;
            let ping_period = secs_var("PING_PERIOD_SECS", DEFAULT_PING_PERIOD)?;
            config.keepalive = KeepaliveConfig::new(pong_wait, ping_period);
        }

        config.handshake_timeout = secs_var("HANDSHAKE_TIMEOUT_SECS", DEFAULT_HANDSHAKE_TIMEOUT)?;

        Ok(config)
    }
}

fn secs_var(name: &str, default: Duration) -> anyhow::Result<Duration> {
    match env::var(name) {
        Ok(value) => {
            let secs: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds", name))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

impl fmt::Debug for StreamingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("keepalive", &self.keepalive)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamingConfig::new("t0ken");
        assert_eq!(config.endpoint, STREAMING_API_URL);
        assert!(!config.keepalive.is_enabled());
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));

        let keepalive = KeepaliveConfig::enabled();
        assert!(keepalive.is_enabled());
        assert_eq!(keepalive.pong_wait(), Duration::from_secs(60));
        assert_eq!(keepalive.ping_period(), Duration::from_secs(54));
        assert!(keepalive.is_consistent());
    }

    #[test]
    fn test_inconsistent_keepalive_is_reported_not_rejected() {
        let keepalive = KeepaliveConfig::new(Duration::from_secs(5), Duration::from_secs(10));
        assert!(keepalive.is_enabled());
        assert!(!keepalive.is_consistent());
    }

    #[test]
    fn test_builder() {
        let config = StreamingConfig::new("t")
            .with_endpoint("ws://127.0.0.1:9000")
            .with_keepalive(KeepaliveConfig::enabled())
            .with_handshake_timeout(Duration::from_secs(1));
        assert_eq!(config.endpoint, "ws://127.0.0.1:9000");
        assert!(config.keepalive.is_enabled());
        assert_eq!(config.handshake_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = StreamingConfig::new("super-secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
