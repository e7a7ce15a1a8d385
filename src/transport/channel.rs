//! Frames, acknowledgements and channel-backed links.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::traits::PeerLink;
use crate::error::{Result, SyncError};
use crate::protocol::Event;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a process-unique connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Delivery guarantee requested for an emitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Dropped without error if it cannot be queued. Used for periodic traffic.
    Volatile,
    /// Failure to queue is reported to the caller.
    Reliable,
}

/// One-shot acknowledgement callback attached to an inbound frame.
pub struct Ack(Box<dyn FnOnce(String) + Send>);

impl Ack {
    /// Wrap a callback receiving the acknowledgement text.
    pub fn new(reply: impl FnOnce(String) + Send + 'static) -> Self {
        Self(Box::new(reply))
    }

    /// Acknowledge with `text`.
    pub fn reply(self, text: impl Into<String>) {
        (self.0)(text.into());
    }
}

impl From<oneshot::Sender<String>> for Ack {
    fn from(tx: oneshot::Sender<String>) -> Self {
        Self::new(move |text| {
            let _ = tx.send(text);
        })
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ack")
    }
}

/// Something that happened on the authority's transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer connection was opened.
    Connected {
        /// The new connection
        connection: ConnectionId,
        /// Link used to emit to the peer
        link: Arc<dyn PeerLink>,
    },
    /// A frame arrived from a peer.
    Received {
        /// Connection it arrived on
        connection: ConnectionId,
        /// Event name
        event: Event,
        /// Message payload
        payload: Value,
        /// Present when the peer awaits an acknowledgement
        ack: Option<Ack>,
    },
    /// A peer connection closed.
    Disconnected {
        /// The closed connection
        connection: ConnectionId,
    },
}

/// Frame emitted by a peer.
#[derive(Debug)]
pub struct PeerFrame {
    /// Event name
    pub event: Event,
    /// Message payload
    pub payload: Value,
    /// Resolved with the authority's acknowledgement text, if requested
    pub ack: Option<oneshot::Sender<String>>,
}

/// Frame delivered to a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// Event name
    pub event: Event,
    /// Message payload
    pub payload: Value,
}

/// Peer end of a connection to the authority.
#[derive(Debug)]
pub struct PeerChannel {
    /// Frames to the authority
    pub outbound: mpsc::Sender<PeerFrame>,
    /// Frames from the authority
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// [`PeerLink`] that queues frames on an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::Sender<InboundFrame>,
}

impl ChannelLink {
    /// Wrap the sending half of a peer's inbound queue.
    #[must_use]
    pub fn new(tx: mpsc::Sender<InboundFrame>) -> Self {
        Self { tx }
    }
}

impl PeerLink for ChannelLink {
    fn emit(&self, event: Event, payload: Value, delivery: Delivery) -> Result<()> {
        match self.tx.try_send(InboundFrame { event, payload }) {
            Ok(()) => Ok(()),
            Err(e) if delivery == Delivery::Volatile => {
                tracing::trace!(%event, error = %e, "dropping volatile frame");
                Ok(())
            }
            Err(e) => Err(SyncError::transport(format!("{event} not delivered: {e}"))),
        }
    }
}
