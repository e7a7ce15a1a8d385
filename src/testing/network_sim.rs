//! Link condition simulation for the in-memory transport

use rand::Rng;
use std::time::Duration;

/// Conditions applied to every frame crossing a simulated link
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkSimulator {
    /// Frame loss probability (0.0 to 1.0)
    pub loss_rate: f64,
    /// Jitter range (max delay added)
    pub jitter_ms: u32,
    /// Base one-way delay added to all frames
    pub delay_ms: u32,
}

impl NetworkSimulator {
    /// Perfect network (no loss, no delay)
    #[must_use]
    pub fn perfect() -> Self {
        Self {
            loss_rate: 0.0,
            jitter_ms: 0,
            delay_ms: 0,
        }
    }

    /// Local network: small symmetric delay, no loss
    #[must_use]
    pub fn lan() -> Self {
        Self {
            loss_rate: 0.0,
            jitter_ms: 2,
            delay_ms: 1,
        }
    }

    /// Congested `WiFi` conditions
    #[must_use]
    pub fn congested_wifi() -> Self {
        Self {
            loss_rate: 0.05,
            jitter_ms: 30,
            delay_ms: 20,
        }
    }

    /// Every frame is lost
    #[must_use]
    pub fn blackhole() -> Self {
        Self {
            loss_rate: 1.0,
            jitter_ms: 0,
            delay_ms: 0,
        }
    }

    /// Fixed one-way delay without loss or jitter
    #[must_use]
    pub fn fixed_delay(delay_ms: u32) -> Self {
        Self {
            loss_rate: 0.0,
            jitter_ms: 0,
            delay_ms,
        }
    }

    /// Should this frame be dropped?
    #[must_use]
    pub fn should_drop(&self) -> bool {
        if self.loss_rate <= 0.0 {
            return false;
        }
        if self.loss_rate >= 1.0 {
            return true;
        }
        rand::thread_rng().gen_bool(self.loss_rate)
    }

    /// Get delay for this frame
    #[must_use]
    pub fn get_delay(&self) -> Duration {
        let jitter: u32 = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        } else {
            0
        };

        Duration::from_millis(u64::from(self.delay_ms + jitter))
    }
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::perfect()
    }
}
