use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::authority::{AuthorityConfig, SyncAuthority};
use crate::clock::ManualTimeSource;
use crate::error::SyncError;
use crate::ids::PeerId;
use crate::protocol::{
    ACK_REGISTRATION_FAILED, Event, Heartbeat, Ping, RequestTime, ResponseTime, RestartClock,
    UpdateTime, WireMessage,
};
use crate::transport::MemoryNetwork;

fn agent(peer: &str) -> (PeerAgent, ManualTimeSource) {
    let source = ManualTimeSource::new(0);
    (PeerAgent::new(peer, Arc::new(source.clone())), source)
}

fn restart(peer: &str, time: i64, framerate: f64) -> RestartClock {
    RestartClock {
        peer_id: PeerId::from(peer),
        time,
        framerate,
    }
}

// ===== Reactions =====

#[test]
fn test_restart_clock_starts_at_authority_time() {
    let (mut agent, source) = agent("a");
    assert!(!agent.is_synchronized());

    agent.on_restart_clock(&restart("a", 5000, 30.0));
    assert!(agent.is_synchronized());
    assert!((agent.framerate() - 30.0).abs() < f64::EPSILON);
    assert_eq!(agent.time(), 5000);

    source.advance(250);
    assert_eq!(agent.time(), 5250);
}

#[test]
fn test_negative_restart_keeps_running_clock() {
    let (mut agent, source) = agent("a");
    agent.on_restart_clock(&restart("a", 1000, 60.0));
    source.advance(40);

    agent.on_restart_clock(&restart("a", -20, 30.0));
    assert!(agent.is_synchronized());
    assert!((agent.framerate() - 60.0).abs() < f64::EPSILON);
    assert_eq!(agent.time(), 1040);
}

#[test]
fn test_messages_for_other_peers_ignored() {
    let (mut agent, _) = agent("a");
    agent.on_restart_clock(&restart("b", 5000, 30.0));
    assert!(!agent.is_synchronized());

    let request = RequestTime {
        peer_id: PeerId::from("b"),
        request_batch_id: "batch".into(),
    };
    assert!(agent.on_request_time(&request).is_none());
    assert!(
        agent
            .on_ping(&Ping {
                peer_id: PeerId::from("b"),
                ping_request_id: "p".into(),
            })
            .is_none()
    );
}

#[test]
fn test_request_time_before_start_reports_sentinel() {
    let (mut agent, _) = agent("a");
    let request = RequestTime {
        peer_id: PeerId::from("a"),
        request_batch_id: "batch-1".into(),
    };

    let response = agent.on_request_time(&request).unwrap();
    assert_eq!(response.time, ResponseTime::CLOCK_NOT_STARTED);
    assert_eq!(response.request_batch_id, "batch-1");

    agent.on_restart_clock(&restart("a", 700, 60.0));
    let response = agent.on_request_time(&request).unwrap();
    assert_eq!(response.time, 700);
    assert!(response.is_clock_started());
}

#[test]
fn test_update_time_queues_drift() {
    let (mut agent, source) = agent("a");
    agent.on_restart_clock(&restart("a", 1000, 60.0));
    let mut events = agent.events().subscribe();

    agent.on_update_time(&UpdateTime {
        peer_id: PeerId::from("a"),
        drift: 25,
    });
    assert_eq!(events.try_recv().unwrap(), PeerEvent::DriftApplied { drift: 25 });
    assert_eq!(agent.time(), 1025);

    agent.on_update_time(&UpdateTime {
        peer_id: PeerId::from("a"),
        drift: -20,
    });
    // held until real time catches up
    assert_eq!(agent.time(), 1025);
    source.advance(30);
    assert_eq!(agent.time(), 1035);
}

#[test]
fn test_ping_echoed_unmodified() {
    let (agent, _) = agent("a");
    let ping = Ping {
        peer_id: PeerId::from("a"),
        ping_request_id: "p-9".into(),
    };
    assert_eq!(agent.on_ping(&ping), Some(ping));
}

// ===== Frames =====

#[test]
fn test_frame_extrapolates_from_heartbeat() {
    let (mut agent, source) = agent("a");
    agent.on_restart_clock(&restart("a", 5000, 30.0));
    agent.on_heartbeat(&Heartbeat {
        peer_id: PeerId::from("a"),
        time: 5000,
        frame: 150,
    });

    source.advance(500);
    assert_eq!(agent.frame(), 165);
    assert_eq!(agent.last_heartbeat(), (5000, 150));
}

#[test]
fn test_frame_before_heartbeat_counts_from_zero() {
    let (mut agent, source) = agent("a");
    agent.on_restart_clock(&restart("a", 0, 24.0));
    source.advance(1000);
    assert_eq!(agent.frame(), 24);
}

#[test]
fn test_heartbeat_published() {
    let (mut agent, _) = agent("a");
    let mut events = agent.events().subscribe();
    agent.on_heartbeat(&Heartbeat {
        peer_id: PeerId::from("a"),
        time: 40,
        frame: 2,
    });
    assert_eq!(
        events.try_recv().unwrap(),
        PeerEvent::Heartbeat { time: 40, frame: 2 }
    );
}

// ===== Raw frames =====

#[test]
fn test_handle_replies_to_ping_and_request_time() {
    let (mut agent, _) = agent("a");

    let (event, payload) = agent
        .handle(
            Event::PingRequest,
            &json!({"peerId": "a", "pingRequestId": "p"}),
        )
        .unwrap()
        .unwrap();
    assert_eq!(event, Event::PingResponse);
    assert_eq!(payload, json!({"peerId": "a", "pingRequestId": "p"}));

    let (event, payload) = agent
        .handle(
            Event::RequestTime,
            &json!({"peerId": "a", "requestBatchId": "b"}),
        )
        .unwrap()
        .unwrap();
    assert_eq!(event, Event::ResponseTime);
    assert_eq!(ResponseTime::decode(&payload).unwrap().time, -1);

    assert!(
        agent
            .handle(Event::Heartbeat, &json!({"peerId": "a", "time": 1, "frame": 0}))
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_handle_rejects_malformed_payload() {
    let (mut agent, _) = agent("a");
    let err = agent
        .handle(Event::UpdateTime, &json!({"peerId": "a", "drift": "lots"}))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidFieldValue { field: "drift", .. }));
    assert!(
        agent
            .handle(Event::RegisterClient, &json!({"peerId": "a"}))
            .unwrap()
            .is_none()
    );
}

// ===== Config =====

#[test]
fn test_peer_config() {
    let config = PeerConfig::builder("screen-2")
        .host("10.0.0.5")
        .port(9000)
        .test_latency(Duration::from_millis(80))
        .build();
    assert_eq!(config.id(), PeerId::from("screen-2"));
    assert_eq!(config.one_way_delay(), Some(Duration::from_millis(40)));
    assert_eq!(PeerConfig::new("x").one_way_delay(), None);

    let parsed: PeerConfig = serde_json::from_str(r#"{"peer_id": "y"}"#).unwrap();
    assert_eq!(parsed, PeerConfig::new("y"));
}

// ===== Client =====

#[tokio::test(start_paused = true)]
async fn test_client_registers_and_gets_clock_started() {
    let (network, events) = MemoryNetwork::new();
    let authority = SyncAuthority::new(AuthorityConfig::default())
        .spawn(events)
        .unwrap();
    authority.start().await.unwrap();

    let client = PeerClient::connect(PeerConfig::new("a"), &network)
        .await
        .unwrap();
    let mut updates = client.subscribe();
    client.register().await.unwrap();

    match updates.recv().await.unwrap() {
        PeerEvent::ClockRestarted { framerate, .. } => {
            assert!((framerate - 60.0).abs() < f64::EPSILON);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(client.is_synchronized().await);

    let again = PeerClient::connect(PeerConfig::new("a"), &network)
        .await
        .unwrap();
    match again.register().await {
        Err(SyncError::RegistrationRefused { peer_id, reason }) => {
            assert_eq!(peer_id, PeerId::from("a"));
            assert_eq!(reason, ACK_REGISTRATION_FAILED);
        }
        other => panic!("expected a refusal, got {other:?}"),
    }

    client.remove().await.unwrap();
    assert!(matches!(
        client.remove().await,
        Err(SyncError::UnknownPeer { .. })
    ));
    assert_eq!(authority.peer_count(false).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_latency_seam_shows_in_rtt() {
    let (network, events) = MemoryNetwork::new();
    let authority = SyncAuthority::new(AuthorityConfig::default())
        .spawn(events)
        .unwrap();

    let config = PeerConfig::builder("slow")
        .test_latency(Duration::from_millis(100))
        .build();
    let client = PeerClient::connect(config, &network).await.unwrap();
    client.register().await.unwrap();

    authority.ping_peer("slow").await.unwrap();
    let peers = authority.peers().await.unwrap();
    assert!(peers[0].rtt_estimate >= 50.0);
    assert!(!peers[0].timed_out);
}
