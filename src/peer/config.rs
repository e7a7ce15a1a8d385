use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::PeerId;

/// Configuration for a [`PeerClient`](super::PeerClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Identity announced to the authority
    pub peer_id: String,

    /// Authority host (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Authority port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Artificial round-trip latency in milliseconds, for testing.
    /// Half is added before each reaction and half before each reply.
    #[serde(default)]
    pub test_latency_ms: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl PeerConfig {
    /// Create a config with default host and port
    #[must_use]
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            host: default_host(),
            port: default_port(),
            test_latency_ms: None,
        }
    }

    /// Create a new config builder
    #[must_use]
    pub fn builder(peer_id: impl Into<String>) -> PeerConfigBuilder {
        PeerConfigBuilder {
            config: Self::new(peer_id),
        }
    }

    /// Peer id as a typed identifier
    #[must_use]
    pub fn id(&self) -> PeerId {
        PeerId::new(self.peer_id.clone())
    }

    /// Artificial one-way delay, half the configured latency
    #[must_use]
    pub fn one_way_delay(&self) -> Option<Duration> {
        self.test_latency_ms
            .filter(|&ms| ms > 0)
            .map(|ms| Duration::from_millis(ms) / 2)
    }
}

/// Builder for `PeerConfig`
#[derive(Debug, Clone)]
pub struct PeerConfigBuilder {
    config: PeerConfig,
}

impl PeerConfigBuilder {
    /// Set authority host
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set authority port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set artificial round-trip latency
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn test_latency(mut self, latency: Duration) -> Self {
        self.config.test_latency_ms = Some(latency.as_millis() as u64);
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> PeerConfig {
        self.config
    }
}
