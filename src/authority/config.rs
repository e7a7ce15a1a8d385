use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Configuration for a [`SyncAuthority`](super::SyncAuthority)
///
/// Durations are written as integer milliseconds when serialized:
///
/// ```json
/// { "port": 8080, "frames_per_second": 30, "ping_interval_ms": 500 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// TCP port to listen on (default: 8080)
    pub port: u16,

    /// Frame rate used for heartbeat frames and peer restarts (default: 60)
    pub frames_per_second: f64,

    /// Period of the RTT estimation loop (default: 1 second)
    #[serde(rename = "ping_interval_ms", with = "duration_ms")]
    pub ping_interval: Duration,

    /// How long to wait for a ping or time response (default: 250ms)
    #[serde(rename = "response_timeout_ms", with = "duration_ms")]
    pub response_timeout: Duration,

    /// Consecutive ping timeouts before eviction (default: 10, `None` or 0 never evicts)
    pub timeout_attempts: Option<u32>,

    /// Period of the time sampling loop (default: 1 second)
    #[serde(rename = "sample_interval_ms", with = "duration_ms")]
    pub sample_interval: Duration,

    /// Period of the heartbeat broadcast (default: 1 second)
    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms")]
    pub heartbeat_interval: Duration,

    /// Weight of the previous estimate when smoothing RTT (default: 0.5)
    pub rtt_weight: f64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            frames_per_second: 60.0,
            ping_interval: Duration::from_millis(1000),
            response_timeout: Duration::from_millis(250),
            timeout_attempts: Some(10),
            sample_interval: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_millis(1000),
            rtt_weight: 0.5,
        }
    }
}

impl AuthorityConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> AuthorityConfigBuilder {
        AuthorityConfigBuilder::default()
    }

    /// Parse and validate a JSON document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if the document does not parse, or
    /// `ConfigurationMisuse` if a value is out of range.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` naming the first bad setting.
    pub fn validate(&self) -> Result<()> {
        if !self.frames_per_second.is_finite() || self.frames_per_second < 0.0 {
            return Err(SyncError::misuse(format!(
                "frames per second must be a non-negative number, got {}",
                self.frames_per_second
            )));
        }
        if !(0.0..=1.0).contains(&self.rtt_weight) {
            return Err(SyncError::misuse(format!(
                "rtt weight must lie in [0, 1], got {}",
                self.rtt_weight
            )));
        }
        for (name, value) in [
            ("ping interval", self.ping_interval),
            ("response timeout", self.response_timeout),
            ("sample interval", self.sample_interval),
            ("heartbeat interval", self.heartbeat_interval),
        ] {
            if value.is_zero() {
                return Err(SyncError::misuse(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Eviction budget, `None` when eviction is disabled.
    #[must_use]
    pub fn eviction_threshold(&self) -> Option<u32> {
        self.timeout_attempts.filter(|&attempts| attempts > 0)
    }
}

/// Builder for `AuthorityConfig`
#[derive(Debug, Clone, Default)]
pub struct AuthorityConfigBuilder {
    config: AuthorityConfig,
}

impl AuthorityConfigBuilder {
    /// Set listening port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set frame rate
    #[must_use]
    pub fn frames_per_second(mut self, fps: f64) -> Self {
        self.config.frames_per_second = fps;
        self
    }

    /// Set ping loop period
    #[must_use]
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set response timeout for pings and time samples
    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Set eviction budget (`None` disables eviction)
    #[must_use]
    pub fn timeout_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.timeout_attempts = attempts;
        self
    }

    /// Set sampling loop period
    #[must_use]
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    /// Set heartbeat period
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set RTT smoothing weight
    #[must_use]
    pub fn rtt_weight(mut self, weight: f64) -> Self {
        self.config.rtt_weight = weight;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMisuse` if a setting is out of range.
    pub fn build(self) -> Result<AuthorityConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
