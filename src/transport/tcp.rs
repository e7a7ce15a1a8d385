//! Newline-delimited JSON frames over TCP.
//!
//! ```text
//! {"event":"register client","payload":{"peerId":"a"},"ack":1}
//! {"event":"ack","ack":1,"payload":"Client successfully registered"}
//! {"event":"heartbeat","payload":{"peerId":"a","time":1000,"frame":60}}
//! ```
//!
//! A frame carrying `ack` expects exactly one `ack` frame back with the
//! same id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LinesCodec};

use super::DEFAULT_QUEUE_DEPTH;
use super::channel::{
    Ack, ConnectionId, Delivery, InboundFrame, PeerChannel, PeerFrame, TransportEvent,
};
use super::traits::{Connector, PeerLink};
use crate::error::{Result, SyncError};
use crate::protocol::Event;

/// Longest accepted frame, in bytes.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

const ACK_EVENT: &str = "ack";

type LineSink = SplitSink<Framed<TcpStream, LinesCodec>, String>;
type LineStream = SplitStream<Framed<TcpStream, LinesCodec>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WireFrame {
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ack: Option<u64>,
}

impl WireFrame {
    fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn framed(stream: TcpStream) -> (LineSink, LineStream) {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH)).split()
}

/// Drain `lines` into `sink` until either side closes.
async fn write_lines(mut sink: LineSink, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        if let Err(e) = sink.send(line).await {
            tracing::debug!(error = %e, "tcp write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

// ===== Authority side =====

/// Listening socket feeding an authority.
#[derive(Debug)]
pub struct TcpServer {
    local_addr: SocketAddr,
    events: mpsc::Receiver<TransportEvent>,
}

impl TcpServer {
    /// Bind `host:port` and start accepting peers.
    ///
    /// Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be bound.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        let (events_tx, events) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        tokio::spawn(accept_loop(listener, events_tx));
        tracing::info!(%local_addr, "listening for peers");
        Ok(Self { local_addr, events })
    }

    /// Address actually bound.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stream of connection events for the authority.
    #[must_use]
    pub fn into_events(self) -> mpsc::Receiver<TransportEvent> {
        self.events
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::Sender<TransportEvent>) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(serve_connection(stream, addr, events.clone()));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            () = events.closed() => break,
        }
    }
    tracing::debug!("tcp acceptor stopped");
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::Sender<TransportEvent>,
) {
    let connection = ConnectionId::next();
    let (sink, mut stream) = framed(stream);
    let (lines_tx, lines_rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
    tokio::spawn(write_lines(sink, lines_rx));

    let link = TcpLink {
        lines: lines_tx.clone(),
    };
    if events
        .send(TransportEvent::Connected {
            connection,
            link: Arc::new(link),
        })
        .await
        .is_err()
    {
        return;
    }
    tracing::debug!(%connection, %addr, "peer connected");

    while let Some(line) = stream.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(%connection, error = %e, "tcp read failed");
                break;
            }
        };
        let frame: WireFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%connection, error = %e, "undecodable frame");
                continue;
            }
        };
        let event = match Event::from_str(&frame.event) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%connection, error = %e, "ignoring frame");
                continue;
            }
        };
        let ack = frame.ack.map(|id| ack_sender(id, lines_tx.clone()));
        let received = TransportEvent::Received {
            connection,
            event,
            payload: frame.payload,
            ack,
        };
        if events.send(received).await.is_err() {
            return;
        }
    }

    let _ = events.send(TransportEvent::Disconnected { connection }).await;
    tracing::debug!(%connection, "peer disconnected");
}

fn ack_sender(id: u64, lines: mpsc::Sender<String>) -> Ack {
    Ack::new(move |text| {
        let reply = WireFrame {
            event: ACK_EVENT.to_string(),
            payload: Value::String(text),
            ack: Some(id),
        };
        match reply.to_line() {
            Ok(line) => {
                if lines.try_send(line).is_err() {
                    tracing::debug!(ack = id, "acknowledgement not delivered");
                }
            }
            Err(e) => tracing::warn!(error = %e, "cannot encode acknowledgement"),
        }
    })
}

/// Authority → peer link over one TCP connection.
#[derive(Debug)]
struct TcpLink {
    lines: mpsc::Sender<String>,
}

impl PeerLink for TcpLink {
    fn emit(&self, event: Event, payload: Value, delivery: Delivery) -> Result<()> {
        let line = WireFrame {
            event: event.as_str().to_string(),
            payload,
            ack: None,
        }
        .to_line()?;
        match self.lines.try_send(line) {
            Ok(()) => Ok(()),
            Err(e) if delivery == Delivery::Volatile => {
                tracing::trace!(%event, error = %e, "dropping volatile frame");
                Ok(())
            }
            Err(e) => Err(SyncError::transport(format!("{event} not delivered: {e}"))),
        }
    }
}

// ===== Peer side =====

/// [`Connector`] opening TCP connections to an authority.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<PeerChannel> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (sink, stream) = framed(stream);

        let (lines_tx, lines_rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        tokio::spawn(write_lines(sink, lines_rx));

        let (outbound, outbound_rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        let (inbound_tx, inbound) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        tokio::spawn(peer_loop(stream, lines_tx, outbound_rx, inbound_tx));

        tracing::debug!(host, port, "connected to authority");
        Ok(PeerChannel { outbound, inbound })
    }
}

async fn peer_loop(
    mut stream: LineStream,
    lines: mpsc::Sender<String>,
    mut outbound: mpsc::Receiver<PeerFrame>,
    inbound: mpsc::Sender<InboundFrame>,
) {
    let mut pending_acks: HashMap<u64, oneshot::Sender<String>> = HashMap::new();
    let mut next_ack = 1u64;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let ack = frame.ack.map(|tx| {
                    let id = next_ack;
                    next_ack += 1;
                    pending_acks.insert(id, tx);
                    id
                });
                let wire = WireFrame {
                    event: frame.event.as_str().to_string(),
                    payload: frame.payload,
                    ack,
                };
                match wire.to_line() {
                    Ok(line) => {
                        if lines.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "cannot encode frame"),
                }
            }
            line = stream.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "tcp read failed");
                        break;
                    }
                    None => break,
                };
                let frame: WireFrame = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable frame");
                        continue;
                    }
                };
                if frame.event == ACK_EVENT {
                    let text = match frame.payload {
                        Value::String(text) => text,
                        other => other.to_string(),
                    };
                    if let Some(tx) = frame.ack.and_then(|id| pending_acks.remove(&id)) {
                        let _ = tx.send(text);
                    }
                    continue;
                }
                match Event::from_str(&frame.event) {
                    Ok(event) => {
                        let inbound_frame = InboundFrame { event, payload: frame.payload };
                        if inbound.send(inbound_frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring frame"),
                }
            }
        }
    }
    tracing::debug!("authority connection closed");
}

#[cfg(test)]
mod wire_tests {
    use super::*;

    #[test]
    fn test_wire_frame_omits_missing_ack() {
        let line = WireFrame {
            event: "heartbeat".into(),
            payload: serde_json::json!({"peerId": "a"}),
            ack: None,
        }
        .to_line()
        .unwrap();
        assert_eq!(line, r#"{"event":"heartbeat","payload":{"peerId":"a"}}"#);
    }

    #[test]
    fn test_wire_frame_defaults_payload() {
        let frame: WireFrame = serde_json::from_str(r#"{"event":"ack","ack":3}"#).unwrap();
        assert_eq!(frame.payload, Value::Null);
        assert_eq!(frame.ack, Some(3));
    }
}
