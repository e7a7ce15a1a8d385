//! Synchronization protocol: wire events and control messages.
//!
//! ## Message Flow
//!
//! ```text
//! Peer                                   Authority
//!   |--- register client (RegisterPeer) -->|
//!   |<-- ping request (Ping) --------------|
//!   |--- ping response (Ping) ------------>|  rtt = now - issued_at
//!   |<-- restart clock (RestartClock) -----|  time = clock + rtt/2
//!   |                                      |
//!   |<-- request time (RequestTime) -------|  batch sample
//!   |--- response time (ResponseTime) ---->|
//!   |<-- update time (UpdateTime) ---------|  drift = average - sample
//!   |                                      |
//!   |<-- heartbeat (Heartbeat) ------------|  time + frame
//! ```
//!
//! Payloads are the plain-object (JSON) form of the message.

pub mod event;
pub mod fields;
pub mod message;

#[cfg(test)]
mod tests;

pub use event::{ACK_NOT_REGISTERED, ACK_REGISTERED, ACK_REGISTRATION_FAILED, ACK_REMOVED, Event};
pub use fields::PlainObject;
pub use message::{
    Heartbeat, Message, MessageKind, Ping, RegisterPeer, RemovePeer, RequestTime, ResponseTime,
    RestartClock, UpdateTime, WireMessage,
};
