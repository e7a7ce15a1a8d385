//! Wire event names and acknowledgement strings.

use std::fmt;
use std::str::FromStr;

use super::message::MessageKind;
use crate::error::SyncError;

/// Acknowledgement sent for a successful registration.
pub const ACK_REGISTERED: &str = "Client successfully registered";
/// Acknowledgement sent when a registration is rejected.
pub const ACK_REGISTRATION_FAILED: &str = "Client registration failed";
/// Acknowledgement sent for a successful removal.
pub const ACK_REMOVED: &str = "Client successfully removed";
/// Acknowledgement sent when the peer to remove is unknown.
pub const ACK_NOT_REGISTERED: &str = "Client did not exist";

/// Named events exchanged between authority and peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Peer → authority, carries `RegisterPeer`.
    RegisterClient,
    /// Peer → authority, carries `RemovePeer`.
    RemoveClient,
    /// Authority → peer, carries `Ping`.
    PingRequest,
    /// Peer → authority, echoes the `Ping`.
    PingResponse,
    /// Authority → peer, carries `RestartClock`.
    RestartClock,
    /// Authority → peer, carries `RequestTime`.
    RequestTime,
    /// Peer → authority, carries `ResponseTime`.
    ResponseTime,
    /// Authority → peer, carries `UpdateTime`.
    UpdateTime,
    /// Authority → peer, carries `Heartbeat`.
    Heartbeat,
}

impl Event {
    /// Every protocol event.
    pub const ALL: [Event; 9] = [
        Event::RegisterClient,
        Event::RemoveClient,
        Event::PingRequest,
        Event::PingResponse,
        Event::RestartClock,
        Event::RequestTime,
        Event::ResponseTime,
        Event::UpdateTime,
        Event::Heartbeat,
    ];

    /// Name used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegisterClient => "register client",
            Self::RemoveClient => "remove client",
            Self::PingRequest => "ping request",
            Self::PingResponse => "ping response",
            Self::RestartClock => "restart clock",
            Self::RequestTime => "request time",
            Self::ResponseTime => "response time",
            Self::UpdateTime => "update time",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Message type carried as payload.
    #[must_use]
    pub fn message_kind(self) -> MessageKind {
        match self {
            Self::RegisterClient => MessageKind::RegisterPeer,
            Self::RemoveClient => MessageKind::RemovePeer,
            Self::PingRequest | Self::PingResponse => MessageKind::Ping,
            Self::RestartClock => MessageKind::RestartClock,
            Self::RequestTime => MessageKind::RequestTime,
            Self::ResponseTime => MessageKind::ResponseTime,
            Self::UpdateTime => MessageKind::UpdateTime,
            Self::Heartbeat => MessageKind::Heartbeat,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| SyncError::UnknownEvent {
                event: s.to_string(),
            })
    }
}
