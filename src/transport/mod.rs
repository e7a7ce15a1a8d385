//! Transport seam between the authority and its peers.
//!
//! The synchronization logic only needs a bidirectional channel of named
//! events carrying JSON payloads:
//!
//! - Authority side: connections show up as [`TransportEvent`]s on an mpsc
//!   channel, and each connection exposes a [`PeerLink`] to emit on.
//! - Peer side: a [`Connector`] turns a host and port into a [`PeerChannel`].
//!
//! [`memory`] wires both sides together in-process; [`tcp`] carries
//! newline-delimited JSON frames over TCP.

mod channel;
pub mod memory;
#[cfg(feature = "tcp")]
pub mod tcp;
mod traits;

#[cfg(test)]
mod tests;

pub use channel::{
    Ack, ChannelLink, ConnectionId, Delivery, InboundFrame, PeerChannel, PeerFrame, TransportEvent,
};
pub use memory::MemoryNetwork;
pub use traits::{Connector, PeerLink};

/// Default capacity of per-connection frame queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;
