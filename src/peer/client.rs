//! Peer runner: connects a [`PeerAgent`] to an authority.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::agent::PeerAgent;
use super::config::PeerConfig;
use super::events::{EventBus, PeerEvent};
use crate::clock::{SharedTimeSource, TokioTimeSource};
use crate::error::{Result, SyncError};
use crate::ids::PeerId;
use crate::protocol::{
    ACK_REGISTERED, ACK_REMOVED, Event, RegisterPeer, RemovePeer, WireMessage,
};
use crate::transport::{Connector, InboundFrame, PeerFrame};

/// A connected peer.
///
/// Inbound frames are handled on a background task; the agent is shared
/// so the application can read [`frame`](Self::frame) and
/// [`time`](Self::time) at any moment.
#[derive(Debug)]
pub struct PeerClient {
    config: PeerConfig,
    agent: Arc<Mutex<PeerAgent>>,
    outbound: mpsc::Sender<PeerFrame>,
    events: EventBus,
    reader: JoinHandle<()>,
}

impl PeerClient {
    /// Connect to the authority named in `config` using the tokio clock.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the authority cannot be reached.
    pub async fn connect(config: PeerConfig, connector: &dyn Connector) -> Result<Self> {
        Self::connect_with(config, connector, TokioTimeSource::shared()).await
    }

    /// Connect with an explicit time source for the local clock.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the authority cannot be reached.
    pub async fn connect_with(
        config: PeerConfig,
        connector: &dyn Connector,
        source: SharedTimeSource,
    ) -> Result<Self> {
        let channel = connector.connect(&config.host, config.port).await?;
        let agent = PeerAgent::new(config.id(), source);
        let events = agent.events().clone();
        let agent = Arc::new(Mutex::new(agent));

        let reader = tokio::spawn(read_loop(
            Arc::clone(&agent),
            channel.inbound,
            channel.outbound.clone(),
            config.one_way_delay(),
        ));
        tracing::info!(peer_id = %config.peer_id, host = %config.host, port = config.port, "peer connected");

        Ok(Self {
            config,
            agent,
            outbound: channel.outbound,
            events,
            reader,
        })
    }

    /// This peer's id.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.config.id()
    }

    /// Subscribe to clock restarts, drifts and heartbeats.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Shared agent, for direct inspection.
    #[must_use]
    pub fn agent(&self) -> Arc<Mutex<PeerAgent>> {
        Arc::clone(&self.agent)
    }

    async fn request(&self, event: Event, payload: Value) -> Result<String> {
        if let Some(delay) = self.config.one_way_delay() {
            tokio::time::sleep(delay).await;
        }
        let (tx, rx) = oneshot::channel();
        self.outbound
            .send(PeerFrame {
                event,
                payload,
                ack: Some(tx),
            })
            .await
            .map_err(|_| SyncError::transport("connection to authority closed"))?;
        rx.await
            .map_err(|_| SyncError::transport(format!("{event} was not acknowledged")))
    }

    /// Register with the authority.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationRefused` with the acknowledgement text if the
    /// authority refused, or a transport error if no acknowledgement arrived.
    pub async fn register(&self) -> Result<()> {
        let peer_id = self.peer_id();
        let message = RegisterPeer {
            peer_id: peer_id.clone(),
        };
        let ack = self.request(Event::RegisterClient, message.encode()).await?;
        if ack == ACK_REGISTERED {
            tracing::info!(%peer_id, "registered");
            Ok(())
        } else {
            tracing::warn!(%peer_id, %ack, "registration refused");
            Err(SyncError::RegistrationRefused {
                peer_id,
                reason: ack,
            })
        }
    }

    /// Leave the synchronized set.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPeer` if the authority did not know this peer.
    pub async fn remove(&self) -> Result<()> {
        let peer_id = self.peer_id();
        let message = RemovePeer {
            peer_id: peer_id.clone(),
        };
        let ack = self.request(Event::RemoveClient, message.encode()).await?;
        if ack == ACK_REMOVED {
            tracing::info!(%peer_id, "removed");
            Ok(())
        } else {
            Err(SyncError::UnknownPeer { peer_id })
        }
    }

    /// Current frame, extrapolated from the last heartbeat.
    pub async fn frame(&self) -> i64 {
        self.agent.lock().await.frame()
    }

    /// Current local time in milliseconds.
    pub async fn time(&self) -> i64 {
        self.agent.lock().await.time()
    }

    /// Whether the authority has started the local clock.
    pub async fn is_synchronized(&self) -> bool {
        self.agent.lock().await.is_synchronized()
    }

    /// Whether the connection to the authority is still being read.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Drop the connection.
    pub fn shutdown(self) {
        self.reader.abort();
        tracing::info!(peer_id = %self.config.peer_id, "peer shut down");
    }
}

async fn read_loop(
    agent: Arc<Mutex<PeerAgent>>,
    mut inbound: mpsc::Receiver<InboundFrame>,
    outbound: mpsc::Sender<PeerFrame>,
    delay: Option<Duration>,
) {
    while let Some(frame) = inbound.recv().await {
        match delay {
            None => react(&agent, frame, &outbound, None).await,
            Some(delay) => {
                let agent = Arc::clone(&agent);
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    react(&agent, frame, &outbound, Some(delay)).await;
                });
            }
        }
    }
    tracing::info!("authority connection closed");
}

async fn react(
    agent: &Mutex<PeerAgent>,
    frame: InboundFrame,
    outbound: &mpsc::Sender<PeerFrame>,
    delay: Option<Duration>,
) {
    let reply = agent.lock().await.handle(frame.event, &frame.payload);
    match reply {
        Ok(Some((event, payload))) => {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let frame = PeerFrame {
                event,
                payload,
                ack: None,
            };
            if outbound.send(frame).await.is_err() {
                tracing::debug!(%event, "reply dropped, connection closed");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(event = %frame.event, error = %e, "undecodable frame"),
    }
}
