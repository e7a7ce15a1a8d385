//! Peer-side reactions to authority messages.

use serde_json::Value;

use super::events::{EventBus, PeerEvent};
use crate::clock::{LogicalClock, SharedTimeSource};
use crate::error::Result;
use crate::ids::PeerId;
use crate::protocol::{
    Event, Heartbeat, Ping, RequestTime, ResponseTime, RestartClock, UpdateTime, WireMessage,
};

/// Frame rate assumed until the authority restarts the clock.
pub const DEFAULT_FRAMERATE: f64 = 60.0;

/// Local clock and frame counter of one peer.
///
/// The agent is transport-agnostic: feed it decoded messages (or raw
/// frames through [`handle`](Self::handle)) and send back whatever it
/// returns.
pub struct PeerAgent {
    peer_id: PeerId,
    clock: LogicalClock,
    framerate: f64,
    last_heartbeat_time: i64,
    last_heartbeat_frame: i64,
    events: EventBus,
}

impl PeerAgent {
    /// Create an agent with a stopped clock.
    #[must_use]
    pub fn new(peer_id: impl Into<PeerId>, source: SharedTimeSource) -> Self {
        Self {
            peer_id: peer_id.into(),
            clock: LogicalClock::new(source),
            framerate: DEFAULT_FRAMERATE,
            last_heartbeat_time: 0,
            last_heartbeat_frame: 0,
            events: EventBus::new(),
        }
    }

    /// This peer's id.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Frames per second last set by the authority.
    #[must_use]
    pub fn framerate(&self) -> f64 {
        self.framerate
    }

    /// Whether the authority has started this peer's clock.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.clock.is_started()
    }

    /// Last heartbeat as `(time, frame)`.
    #[must_use]
    pub fn last_heartbeat(&self) -> (i64, i64) {
        (self.last_heartbeat_time, self.last_heartbeat_frame)
    }

    /// Event bus carrying clock restarts, drifts and heartbeats.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current local time in milliseconds.
    pub fn time(&mut self) -> i64 {
        self.clock.get_time()
    }

    /// Current frame, extrapolated from the last heartbeat.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn frame(&mut self) -> i64 {
        let elapsed = self.clock.get_time() - self.last_heartbeat_time;
        self.last_heartbeat_frame + (elapsed as f64 * self.framerate / 1000.0).floor() as i64
    }

    fn is_mine(&self, peer_id: &PeerId, event: Event) -> bool {
        let mine = *peer_id == self.peer_id;
        if !mine {
            tracing::debug!(peer_id = %self.peer_id, to = %peer_id, %event, "ignoring message for another peer");
        }
        mine
    }

    /// Restart the clock at the authority's time and adopt its frame rate.
    pub fn on_restart_clock(&mut self, msg: &RestartClock) {
        if !self.is_mine(&msg.peer_id, Event::RestartClock) {
            return;
        }
        if let Err(e) = self.clock.restart_at(msg.time) {
            tracing::warn!(peer_id = %self.peer_id, error = %e, "rejected restart time");
            return;
        }
        self.framerate = msg.framerate;
        tracing::info!(peer_id = %self.peer_id, time = msg.time, framerate = msg.framerate, "clock restarted");
        self.events.emit(PeerEvent::ClockRestarted {
            time: msg.time,
            framerate: msg.framerate,
        });
    }

    /// Report the local clock, or the not-started sentinel.
    pub fn on_request_time(&mut self, msg: &RequestTime) -> Option<ResponseTime> {
        if !self.is_mine(&msg.peer_id, Event::RequestTime) {
            return None;
        }
        let time = if self.clock.is_started() {
            self.clock.get_time()
        } else {
            ResponseTime::CLOCK_NOT_STARTED
        };
        Some(ResponseTime {
            peer_id: self.peer_id.clone(),
            request_batch_id: msg.request_batch_id.clone(),
            time,
        })
    }

    /// Queue the authority's drift correction.
    pub fn on_update_time(&mut self, msg: &UpdateTime) {
        if !self.is_mine(&msg.peer_id, Event::UpdateTime) {
            return;
        }
        self.clock.adjust(msg.drift);
        tracing::debug!(peer_id = %self.peer_id, drift = msg.drift, "drift queued");
        self.events.emit(PeerEvent::DriftApplied { drift: msg.drift });
    }

    /// Echo a ping unmodified.
    pub fn on_ping(&self, msg: &Ping) -> Option<Ping> {
        self.is_mine(&msg.peer_id, Event::PingRequest)
            .then(|| msg.clone())
    }

    /// Remember the authority's time and frame.
    pub fn on_heartbeat(&mut self, msg: &Heartbeat) {
        if !self.is_mine(&msg.peer_id, Event::Heartbeat) {
            return;
        }
        self.last_heartbeat_time = msg.time;
        self.last_heartbeat_frame = msg.frame;
        self.events.emit(PeerEvent::Heartbeat {
            time: msg.time,
            frame: msg.frame,
        });
    }

    /// Decode and react to a raw frame, returning the reply to send, if any.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the payload is not a valid message.
    pub fn handle(&mut self, event: Event, payload: &Value) -> Result<Option<(Event, Value)>> {
        let reply = match event {
            Event::PingRequest => self
                .on_ping(&Ping::decode(payload)?)
                .map(|pong| (Event::PingResponse, pong.encode())),
            Event::RequestTime => self
                .on_request_time(&RequestTime::decode(payload)?)
                .map(|response| (Event::ResponseTime, response.encode())),
            Event::RestartClock => {
                self.on_restart_clock(&RestartClock::decode(payload)?);
                None
            }
            Event::UpdateTime => {
                self.on_update_time(&UpdateTime::decode(payload)?);
                None
            }
            Event::Heartbeat => {
                self.on_heartbeat(&Heartbeat::decode(payload)?);
                None
            }
            other => {
                tracing::warn!(peer_id = %self.peer_id, event = %other, "ignoring peer-bound event");
                None
            }
        };
        Ok(reply)
    }
}

impl std::fmt::Debug for PeerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerAgent")
            .field("peer_id", &self.peer_id)
            .field("clock", &self.clock)
            .field("framerate", &self.framerate)
            .field("last_heartbeat_time", &self.last_heartbeat_time)
            .field("last_heartbeat_frame", &self.last_heartbeat_frame)
            .finish_non_exhaustive()
    }
}
