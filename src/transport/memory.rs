//! In-process transport with simulated link conditions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::DEFAULT_QUEUE_DEPTH;
use super::channel::{
    Ack, ChannelLink, ConnectionId, Delivery, InboundFrame, PeerChannel, PeerFrame,
    TransportEvent,
};
use super::traits::{Connector, PeerLink};
use crate::error::{Result, SyncError};
use crate::protocol::Event;
use crate::testing::NetworkSimulator;

/// In-process network connecting peers to one authority.
///
/// Host and port passed to [`Connector::connect`] are ignored; every
/// channel reaches the authority that owns the receiver returned by
/// [`MemoryNetwork::new`].
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    authority: mpsc::Sender<TransportEvent>,
    conditions: NetworkSimulator,
}

impl MemoryNetwork {
    /// Create a network and the authority's event receiver.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<TransportEvent>) {
        let (authority, events) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        (
            Self {
                authority,
                conditions: NetworkSimulator::perfect(),
            },
            events,
        )
    }

    /// Apply `conditions` to channels opened from now on.
    #[must_use]
    pub fn with_conditions(&self, conditions: NetworkSimulator) -> Self {
        Self {
            authority: self.authority.clone(),
            conditions,
        }
    }

    /// Open a channel to the authority.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AuthorityStopped`] if the authority's receiver
    /// has been dropped.
    pub async fn open(&self) -> Result<PeerChannel> {
        let connection = ConnectionId::next();
        let (to_peer, inbound) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        let link = SimulatedLink {
            inner: ChannelLink::new(to_peer.clone()),
            to_peer,
            conditions: self.conditions.clone(),
        };
        self.authority
            .send(TransportEvent::Connected {
                connection,
                link: Arc::new(link),
            })
            .await
            .map_err(|_| SyncError::AuthorityStopped)?;

        let (outbound, from_peer) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        tokio::spawn(forward_to_authority(
            connection,
            from_peer,
            self.authority.clone(),
            self.conditions.clone(),
        ));

        tracing::debug!(%connection, "memory channel opened");
        Ok(PeerChannel { outbound, inbound })
    }
}

#[async_trait]
impl Connector for MemoryNetwork {
    async fn connect(&self, _host: &str, _port: u16) -> Result<PeerChannel> {
        self.open().await
    }
}

async fn forward_to_authority(
    connection: ConnectionId,
    mut from_peer: mpsc::Receiver<PeerFrame>,
    authority: mpsc::Sender<TransportEvent>,
    conditions: NetworkSimulator,
) {
    while let Some(frame) = from_peer.recv().await {
        // Acknowledged frames model the non-volatile emit and are never lost.
        if frame.ack.is_none() && conditions.should_drop() {
            tracing::trace!(%connection, event = %frame.event, "simulated loss");
            continue;
        }
        let delay = conditions.get_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let event = TransportEvent::Received {
            connection,
            event: frame.event,
            payload: frame.payload,
            ack: frame.ack.map(Ack::from),
        };
        if authority.send(event).await.is_err() {
            return;
        }
    }
    let _ = authority
        .send(TransportEvent::Disconnected { connection })
        .await;
}

/// Authority → peer link subject to simulated conditions.
#[derive(Debug)]
struct SimulatedLink {
    inner: ChannelLink,
    to_peer: mpsc::Sender<InboundFrame>,
    conditions: NetworkSimulator,
}

impl PeerLink for SimulatedLink {
    fn emit(&self, event: Event, payload: Value, delivery: Delivery) -> Result<()> {
        if self.conditions.should_drop() {
            tracing::trace!(%event, "simulated loss");
            return Ok(());
        }
        let delay = self.conditions.get_delay();
        if delay.is_zero() {
            return self.inner.emit(event, payload, delivery);
        }
        let to_peer = self.to_peer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = to_peer.send(InboundFrame { event, payload }).await;
        });
        Ok(())
    }
}
