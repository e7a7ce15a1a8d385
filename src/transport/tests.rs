use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use super::*;
use crate::protocol::Event;
use crate::testing::NetworkSimulator;

// ===== ChannelLink =====

#[test]
fn test_volatile_emit_dropped_when_full() {
    let (tx, mut rx) = mpsc::channel(1);
    let link = ChannelLink::new(tx);

    link.emit(Event::Heartbeat, json!({"n": 1}), Delivery::Volatile)
        .unwrap();
    link.emit(Event::Heartbeat, json!({"n": 2}), Delivery::Volatile)
        .unwrap();

    assert_eq!(rx.try_recv().unwrap().payload, json!({"n": 1}));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_reliable_emit_reports_failure() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let link = ChannelLink::new(tx);

    let err = link
        .emit(Event::RestartClock, json!({}), Delivery::Reliable)
        .unwrap_err();
    assert!(matches!(err, crate::error::SyncError::Transport { .. }));
}

#[test]
fn test_connection_ids_are_unique() {
    let a = ConnectionId::next();
    let b = ConnectionId::next();
    assert_ne!(a, b);
    assert!(a.to_string().starts_with("conn#"));
}

// ===== Memory transport =====

#[tokio::test]
async fn test_memory_round_trip_with_ack() {
    let (network, mut events) = MemoryNetwork::new();
    let mut channel = network.connect("ignored", 0).await.unwrap();

    let Some(TransportEvent::Connected { connection, link }) = events.recv().await else {
        panic!("expected connection");
    };

    let (ack_tx, ack_rx) = oneshot::channel();
    channel
        .outbound
        .send(PeerFrame {
            event: Event::RegisterClient,
            payload: json!({"peerId": "a"}),
            ack: Some(ack_tx),
        })
        .await
        .unwrap();

    match events.recv().await {
        Some(TransportEvent::Received {
            connection: from,
            event,
            payload,
            ack: Some(ack),
        }) => {
            assert_eq!(from, connection);
            assert_eq!(event, Event::RegisterClient);
            assert_eq!(payload, json!({"peerId": "a"}));
            ack.reply("ok");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(ack_rx.await.unwrap(), "ok");

    link.emit(Event::Heartbeat, json!({"time": 1}), Delivery::Volatile)
        .unwrap();
    let frame = channel.inbound.recv().await.unwrap();
    assert_eq!(frame.event, Event::Heartbeat);
}

#[tokio::test]
async fn test_memory_disconnect_reported() {
    let (network, mut events) = MemoryNetwork::new();
    let channel = network.open().await.unwrap();
    let Some(TransportEvent::Connected { connection, .. }) = events.recv().await else {
        panic!("expected connection");
    };

    drop(channel);

    match events.recv().await {
        Some(TransportEvent::Disconnected { connection: closed }) => {
            assert_eq!(closed, connection);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_memory_blackhole_drops_volatile_traffic() {
    let (network, mut events) = MemoryNetwork::new();
    let mut channel = network
        .with_conditions(NetworkSimulator::blackhole())
        .open()
        .await
        .unwrap();
    let Some(TransportEvent::Connected { link, .. }) = events.recv().await else {
        panic!("expected connection");
    };

    link.emit(Event::Heartbeat, json!({}), Delivery::Volatile)
        .unwrap();
    assert!(channel.inbound.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_memory_delay_applied() {
    let (network, mut events) = MemoryNetwork::new();
    let mut channel = network
        .with_conditions(NetworkSimulator::fixed_delay(40))
        .open()
        .await
        .unwrap();
    let Some(TransportEvent::Connected { link, .. }) = events.recv().await else {
        panic!("expected connection");
    };

    let sent_at = tokio::time::Instant::now();
    link.emit(Event::Heartbeat, json!({}), Delivery::Volatile)
        .unwrap();
    channel.inbound.recv().await.unwrap();
    assert!(sent_at.elapsed() >= std::time::Duration::from_millis(40));
}

#[tokio::test]
async fn test_authority_gone_fails_open() {
    let (network, events) = MemoryNetwork::new();
    drop(events);
    assert!(matches!(
        network.open().await,
        Err(crate::error::SyncError::AuthorityStopped)
    ));
}

// ===== TCP transport =====

#[cfg(feature = "tcp")]
#[tokio::test]
async fn test_tcp_round_trip_with_ack() {
    use super::tcp::{TcpConnector, TcpServer};

    let server = TcpServer::bind("127.0.0.1", 0).await.unwrap();
    let port = server.local_addr().port();
    let mut events = server.into_events();

    let mut channel = TcpConnector.connect("127.0.0.1", port).await.unwrap();
    let Some(TransportEvent::Connected { link, .. }) = events.recv().await else {
        panic!("expected connection");
    };

    let (ack_tx, ack_rx) = oneshot::channel();
    channel
        .outbound
        .send(PeerFrame {
            event: Event::RemoveClient,
            payload: json!({"peerId": "a"}),
            ack: Some(ack_tx),
        })
        .await
        .unwrap();

    match events.recv().await {
        Some(TransportEvent::Received {
            event,
            ack: Some(ack),
            ..
        }) => {
            assert_eq!(event, Event::RemoveClient);
            ack.reply(crate::protocol::ACK_NOT_REGISTERED);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(ack_rx.await.unwrap(), crate::protocol::ACK_NOT_REGISTERED);

    link.emit(
        Event::UpdateTime,
        json!({"peerId": "a", "drift": -4}),
        Delivery::Reliable,
    )
    .unwrap();
    let frame = channel.inbound.recv().await.unwrap();
    assert_eq!(frame.event, Event::UpdateTime);
    assert_eq!(frame.payload["drift"], json!(-4));

    drop(channel);
    loop {
        match events.recv().await {
            Some(TransportEvent::Disconnected { .. }) | None => break,
            Some(_) => {}
        }
    }
}
