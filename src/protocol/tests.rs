use std::str::FromStr;

use proptest::prelude::*;
use serde_json::json;

use super::*;
use crate::error::SyncError;
use crate::ids::PeerId;

// ===== Events =====

#[test]
fn test_event_names_round_trip() {
    for event in Event::ALL {
        assert_eq!(Event::from_str(event.as_str()).unwrap(), event);
    }
    assert_eq!(Event::RegisterClient.to_string(), "register client");
    assert_eq!(Event::PingResponse.message_kind(), MessageKind::Ping);
}

#[test]
fn test_unknown_event_rejected() {
    let err = Event::from_str("teleport").unwrap_err();
    assert!(matches!(err, SyncError::UnknownEvent { ref event } if event == "teleport"));
}

// ===== Encoding =====

#[test]
fn test_encode_uses_declared_attribute_names() {
    let msg = ResponseTime {
        peer_id: PeerId::from("screen-1"),
        request_batch_id: "batch-7".to_string(),
        time: 1234,
    };
    assert_eq!(
        msg.encode(),
        json!({"peerId": "screen-1", "requestBatchId": "batch-7", "time": 1234})
    );
    assert_eq!(
        ResponseTime::required_fields(),
        &["peerId", "requestBatchId", "time"]
    );
}

#[test]
fn test_restart_clock_encodes_framerate_as_number() {
    let msg = RestartClock {
        peer_id: PeerId::from("a"),
        time: 500,
        framerate: 29.97,
    };
    let value = msg.encode();
    assert_eq!(value["framerate"], json!(29.97));
    assert_eq!(RestartClock::decode(&value).unwrap(), msg);
}

// ===== Decoding =====

#[test]
fn test_decode_missing_attribute() {
    let err = Heartbeat::decode(&json!({"peerId": "a", "time": 10})).unwrap_err();
    assert!(matches!(
        err,
        SyncError::MissingAttribute { attribute: "frame" }
    ));
}

#[test]
fn test_decode_empty_or_null_attribute_is_missing() {
    let err = Ping::decode(&json!({"peerId": "", "pingRequestId": "p"})).unwrap_err();
    assert!(matches!(
        err,
        SyncError::MissingAttribute { attribute: "peerId" }
    ));

    let err = Ping::decode(&json!({"peerId": "a", "pingRequestId": null})).unwrap_err();
    assert!(matches!(
        err,
        SyncError::MissingAttribute {
            attribute: "pingRequestId"
        }
    ));
}

#[test]
fn test_presence_checked_before_shape() {
    // `time` is malformed but `frame` is missing: presence wins.
    let err = Heartbeat::decode(&json!({"peerId": "a", "time": "soon"})).unwrap_err();
    assert!(matches!(
        err,
        SyncError::MissingAttribute { attribute: "frame" }
    ));
}

#[test]
fn test_decode_non_numeric_fields() {
    let err = UpdateTime::decode(&json!({"peerId": "a", "drift": "abc"})).unwrap_err();
    assert!(matches!(
        err,
        SyncError::InvalidFieldValue { field: "drift", .. }
    ));

    let err = Heartbeat::decode(&json!({"peerId": "a", "time": "x1", "frame": 3})).unwrap_err();
    assert!(matches!(err, SyncError::InvalidFieldValue { field: "time", .. }));

    let err = Heartbeat::decode(&json!({"peerId": "a", "time": 1, "frame": 2.5})).unwrap_err();
    assert!(matches!(
        err,
        SyncError::InvalidFieldValue { field: "frame", .. }
    ));

    let err = UpdateTime::decode(&json!({"peerId": "a", "drift": true})).unwrap_err();
    assert!(err.is_validation_error());
}

#[test]
fn test_decode_accepts_numeric_strings_and_numeric_ids() {
    let msg = UpdateTime::decode(&json!({"peerId": 3, "drift": "-15"})).unwrap();
    assert_eq!(msg.peer_id, PeerId::from("3"));
    assert_eq!(msg.drift, -15);

    let msg = Heartbeat::decode(&json!({"peerId": "a", "time": 1000.0, "frame": "60"})).unwrap();
    assert_eq!(msg.time, 1000);
    assert_eq!(msg.frame, 60);
}

#[test]
fn test_restart_clock_validation() {
    let err = RestartClock::decode(&json!({"peerId": "a", "time": -5, "framerate": 30}))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidFieldValue { field: "time", .. }));

    let err = RestartClock::decode(&json!({"peerId": "a", "time": 5, "framerate": -30}))
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::InvalidFieldValue {
            field: "framerate",
            ..
        }
    ));

    let msg = RestartClock::decode(&json!({"peerId": "a", "time": 5, "framerate": "23.976"}))
        .unwrap();
    assert!((msg.framerate - 23.976).abs() < f64::EPSILON);
}

#[test]
fn test_response_time_sentinel() {
    let msg =
        ResponseTime::decode(&json!({"peerId": "a", "requestBatchId": "b", "time": -1})).unwrap();
    assert!(!msg.is_clock_started());

    let err = ResponseTime::decode(&json!({"peerId": "a", "requestBatchId": "b", "time": -2}))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidFieldValue { field: "time", .. }));
}

#[test]
fn test_decode_rejects_non_object_payload() {
    let err = RegisterPeer::decode(&json!(["peerId"])).unwrap_err();
    assert!(matches!(err, SyncError::MalformedPayload { .. }));
}

#[test]
fn test_message_enum_dispatch() {
    let payload = json!({"peerId": "a", "pingRequestId": "p-1"});
    let msg = Message::decode(Event::PingResponse.message_kind(), &payload).unwrap();
    assert_eq!(msg.kind(), MessageKind::Ping);
    assert_eq!(msg.peer_id(), &PeerId::from("a"));
    assert_eq!(msg.encode(), payload);
}

// ===== Round-trip law =====

fn peer_id_strategy() -> impl Strategy<Value = PeerId> {
    "[a-z0-9-]{1,16}".prop_map(PeerId::from)
}

fn id_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{1,32}"
}

fn message_strategy() -> impl Strategy<Value = Message> {
    let time = 0i64..10_000_000;
    prop_oneof![
        peer_id_strategy().prop_map(|peer_id| Message::from(RegisterPeer { peer_id })),
        peer_id_strategy().prop_map(|peer_id| Message::from(RemovePeer { peer_id })),
        (peer_id_strategy(), id_strategy()).prop_map(|(peer_id, ping_request_id)| {
            Message::from(Ping {
                peer_id,
                ping_request_id,
            })
        }),
        (peer_id_strategy(), time.clone(), 0u32..24_000).prop_map(|(peer_id, time, fps)| {
            Message::from(RestartClock {
                peer_id,
                time,
                framerate: f64::from(fps) / 100.0,
            })
        }),
        (peer_id_strategy(), id_strategy()).prop_map(|(peer_id, request_batch_id)| {
            Message::from(RequestTime {
                peer_id,
                request_batch_id,
            })
        }),
        (peer_id_strategy(), id_strategy(), -1i64..10_000_000).prop_map(
            |(peer_id, request_batch_id, time)| {
                Message::from(ResponseTime {
                    peer_id,
                    request_batch_id,
                    time,
                })
            }
        ),
        (peer_id_strategy(), -100_000i64..100_000)
            .prop_map(|(peer_id, drift)| Message::from(UpdateTime { peer_id, drift })),
        (peer_id_strategy(), time, 0i64..1_000_000).prop_map(|(peer_id, time, frame)| {
            Message::from(Heartbeat {
                peer_id,
                time,
                frame,
            })
        }),
    ]
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(msg in message_strategy()) {
        let decoded = Message::decode(msg.kind(), &msg.encode()).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn prop_dropping_any_attribute_is_reported(msg in message_strategy(), pick in any::<prop::sample::Index>()) {
        let fields = msg.kind().fields();
        let dropped = fields[pick.index(fields.len())];
        let mut payload = msg.encode();
        payload.as_object_mut().unwrap().remove(dropped);
        let err = Message::decode(msg.kind(), &payload).unwrap_err();
        let is_missing = matches!(err, SyncError::MissingAttribute { attribute } if attribute == dropped);
        prop_assert!(is_missing);
    }
}
