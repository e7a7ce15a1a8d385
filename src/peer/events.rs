//! Event bus for peer-side synchronization events

use tokio::sync::broadcast;

/// Something the authority did to this peer's clock
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The authority restarted the clock
    ClockRestarted {
        /// Time the clock restarted at
        time: i64,
        /// Frame rate from now on
        framerate: f64,
    },
    /// A drift correction was queued
    DriftApplied {
        /// Correction in milliseconds
        drift: i64,
    },
    /// A heartbeat arrived
    Heartbeat {
        /// Authority time
        time: i64,
        /// Authority frame
        frame: i64,
    },
}

/// Event bus for distributing peer events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PeerEvent>,
}

impl EventBus {
    /// Create a new event bus
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    /// Subscribe to events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: PeerEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    /// Get subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
