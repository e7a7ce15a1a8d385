//! Control messages and their plain-object mapping.
//!
//! Every message declares a fixed, ordered list of required attributes.
//! Decoding first checks that each attribute is present and non-empty,
//! then reads every attribute through its typed reader:
//!
//! | Message        | Attributes                          |
//! |----------------|-------------------------------------|
//! | `RegisterPeer` | peerId                              |
//! | `RemovePeer`   | peerId                              |
//! | `Ping`         | peerId, pingRequestId               |
//! | `RestartClock` | peerId, time, framerate             |
//! | `RequestTime`  | peerId, requestBatchId              |
//! | `ResponseTime` | peerId, requestBatchId, time        |
//! | `UpdateTime`   | peerId, drift                       |
//! | `Heartbeat`    | peerId, time, frame                 |

use serde_json::{Value, json};

use super::fields::{self, PlainObject};
use crate::error::Result;
use crate::ids::PeerId;

/// The eight message types of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Peer asks to join.
    RegisterPeer,
    /// Peer asks to leave.
    RemovePeer,
    /// Round-trip ping.
    Ping,
    /// Authority restarts a peer clock.
    RestartClock,
    /// Authority samples a peer clock.
    RequestTime,
    /// Peer reports its clock.
    ResponseTime,
    /// Authority pushes a drift correction.
    UpdateTime,
    /// Authority broadcasts its time and frame.
    Heartbeat,
}

impl MessageKind {
    /// Required attributes, in declaration order.
    #[must_use]
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::RegisterPeer | Self::RemovePeer => &["peerId"],
            Self::Ping => &["peerId", "pingRequestId"],
            Self::RestartClock => &["peerId", "time", "framerate"],
            Self::RequestTime => &["peerId", "requestBatchId"],
            Self::ResponseTime => &["peerId", "requestBatchId", "time"],
            Self::UpdateTime => &["peerId", "drift"],
            Self::Heartbeat => &["peerId", "time", "frame"],
        }
    }
}

/// Encode/decode contract shared by every message type.
pub trait WireMessage: Sized {
    /// Which message this is.
    const KIND: MessageKind;

    /// Peer the message concerns.
    fn peer_id(&self) -> &PeerId;

    /// Read every declared attribute.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFieldValue` if an attribute has the wrong shape.
    fn read_fields(obj: &PlainObject) -> Result<Self>;

    /// Write every declared attribute.
    fn to_plain_object(&self) -> PlainObject;

    /// Required attributes, in declaration order.
    #[must_use]
    fn required_fields() -> &'static [&'static str] {
        Self::KIND.fields()
    }

    /// Build from a plain object.
    ///
    /// # Errors
    ///
    /// Returns `MissingAttribute` if a declared attribute is absent or
    /// empty, otherwise the first `InvalidFieldValue`.
    fn from_plain_object(obj: &PlainObject) -> Result<Self> {
        fields::require(obj, Self::required_fields())?;
        Self::read_fields(obj)
    }

    /// Decode a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` if the payload is not an object, then
    /// as [`from_plain_object`](Self::from_plain_object).
    fn decode(payload: &Value) -> Result<Self> {
        Self::from_plain_object(fields::object(payload)?)
    }

    /// Encode as a JSON payload.
    #[must_use]
    fn encode(&self) -> Value {
        Value::Object(self.to_plain_object())
    }
}

fn plain(value: Value) -> PlainObject {
    match value {
        Value::Object(map) => map,
        _ => PlainObject::new(),
    }
}

/// Sent by a peer to join the synchronized set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterPeer {
    /// Peer joining.
    pub peer_id: PeerId,
}

impl WireMessage for RegisterPeer {
    const KIND: MessageKind = MessageKind::RegisterPeer;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn read_fields(obj: &PlainObject) -> Result<Self> {
        Ok(Self {
            peer_id: fields::peer_id(obj, "peerId")?,
        })
    }

    fn to_plain_object(&self) -> PlainObject {
        plain(json!({ "peerId": self.peer_id.as_str() }))
    }
}

/// Sent by a peer to leave the synchronized set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovePeer {
    /// Peer leaving.
    pub peer_id: PeerId,
}

impl WireMessage for RemovePeer {
    const KIND: MessageKind = MessageKind::RemovePeer;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn read_fields(obj: &PlainObject) -> Result<Self> {
        Ok(Self {
            peer_id: fields::peer_id(obj, "peerId")?,
        })
    }

    fn to_plain_object(&self) -> PlainObject {
        plain(json!({ "peerId": self.peer_id.as_str() }))
    }
}

/// Round-trip ping; the peer echoes it back unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    /// Peer being pinged.
    pub peer_id: PeerId,
    /// Key of the outstanding ping.
    pub ping_request_id: String,
}

impl WireMessage for Ping {
    const KIND: MessageKind = MessageKind::Ping;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn read_fields(obj: &PlainObject) -> Result<Self> {
        Ok(Self {
            peer_id: fields::peer_id(obj, "peerId")?,
            ping_request_id: fields::identifier(obj, "pingRequestId")?,
        })
    }

    fn to_plain_object(&self) -> PlainObject {
        plain(json!({
            "peerId": self.peer_id.as_str(),
            "pingRequestId": self.ping_request_id,
        }))
    }
}

/// Tells a peer to restart its clock at `time` and count frames at `framerate`.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartClock {
    /// Peer whose clock restarts.
    pub peer_id: PeerId,
    /// Time to restart at, in milliseconds.
    pub time: i64,
    /// Frames per second.
    pub framerate: f64,
}

impl WireMessage for RestartClock {
    const KIND: MessageKind = MessageKind::RestartClock;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn read_fields(obj: &PlainObject) -> Result<Self> {
        let peer_id = fields::peer_id(obj, "peerId")?;
        let time = fields::integer(obj, "time")?;
        if time < 0 {
            return Err(fields::invalid("time", &Value::from(time)));
        }
        Ok(Self {
            peer_id,
            time,
            framerate: fields::non_negative_decimal(obj, "framerate")?,
        })
    }

    fn to_plain_object(&self) -> PlainObject {
        let mut obj = plain(json!({
            "peerId": self.peer_id.as_str(),
            "time": self.time,
        }));
        obj.insert("framerate".into(), fields::decimal_value(self.framerate));
        obj
    }
}

/// Asks a peer for its clock as part of sampling batch `request_batch_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTime {
    /// Peer sampled.
    pub peer_id: PeerId,
    /// Sampling batch.
    pub request_batch_id: String,
}

impl WireMessage for RequestTime {
    const KIND: MessageKind = MessageKind::RequestTime;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn read_fields(obj: &PlainObject) -> Result<Self> {
        Ok(Self {
            peer_id: fields::peer_id(obj, "peerId")?,
            request_batch_id: fields::identifier(obj, "requestBatchId")?,
        })
    }

    fn to_plain_object(&self) -> PlainObject {
        plain(json!({
            "peerId": self.peer_id.as_str(),
            "requestBatchId": self.request_batch_id,
        }))
    }
}

/// A peer's clock reading for a sampling batch.
///
/// `time` is [`CLOCK_NOT_STARTED`](Self::CLOCK_NOT_STARTED) when the peer
/// has not started its clock yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseTime {
    /// Peer reporting.
    pub peer_id: PeerId,
    /// Sampling batch answered.
    pub request_batch_id: String,
    /// Peer clock in milliseconds.
    pub time: i64,
}

impl ResponseTime {
    /// Sentinel reported by a peer whose clock is not running.
    pub const CLOCK_NOT_STARTED: i64 = -1;

    /// Whether the peer's clock was running when it answered.
    #[must_use]
    pub fn is_clock_started(&self) -> bool {
        self.time != Self::CLOCK_NOT_STARTED
    }
}

impl WireMessage for ResponseTime {
    const KIND: MessageKind = MessageKind::ResponseTime;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn read_fields(obj: &PlainObject) -> Result<Self> {
        let peer_id = fields::peer_id(obj, "peerId")?;
        let request_batch_id = fields::identifier(obj, "requestBatchId")?;
        let time = fields::integer(obj, "time")?;
        if time < Self::CLOCK_NOT_STARTED {
            return Err(fields::invalid("time", &Value::from(time)));
        }
        Ok(Self {
            peer_id,
            request_batch_id,
            time,
        })
    }

    fn to_plain_object(&self) -> PlainObject {
        plain(json!({
            "peerId": self.peer_id.as_str(),
            "requestBatchId": self.request_batch_id,
            "time": self.time,
        }))
    }
}

/// Signed correction a peer applies to its clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTime {
    /// Peer corrected.
    pub peer_id: PeerId,
    /// Correction in milliseconds.
    pub drift: i64,
}

impl WireMessage for UpdateTime {
    const KIND: MessageKind = MessageKind::UpdateTime;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn read_fields(obj: &PlainObject) -> Result<Self> {
        Ok(Self {
            peer_id: fields::peer_id(obj, "peerId")?,
            drift: fields::integer(obj, "drift")?,
        })
    }

    fn to_plain_object(&self) -> PlainObject {
        plain(json!({
            "peerId": self.peer_id.as_str(),
            "drift": self.drift,
        }))
    }
}

/// Authority time and frame snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    /// Recipient.
    pub peer_id: PeerId,
    /// Authority time in milliseconds.
    pub time: i64,
    /// Authority frame at `time`.
    pub frame: i64,
}

impl WireMessage for Heartbeat {
    const KIND: MessageKind = MessageKind::Heartbeat;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn read_fields(obj: &PlainObject) -> Result<Self> {
        Ok(Self {
            peer_id: fields::peer_id(obj, "peerId")?,
            time: fields::integer(obj, "time")?,
            frame: fields::integer(obj, "frame")?,
        })
    }

    fn to_plain_object(&self) -> PlainObject {
        plain(json!({
            "peerId": self.peer_id.as_str(),
            "time": self.time,
            "frame": self.frame,
        }))
    }
}

/// Any protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// See [`RegisterPeer`].
    RegisterPeer(RegisterPeer),
    /// See [`RemovePeer`].
    RemovePeer(RemovePeer),
    /// See [`Ping`].
    Ping(Ping),
    /// See [`RestartClock`].
    RestartClock(RestartClock),
    /// See [`RequestTime`].
    RequestTime(RequestTime),
    /// See [`ResponseTime`].
    ResponseTime(ResponseTime),
    /// See [`UpdateTime`].
    UpdateTime(UpdateTime),
    /// See [`Heartbeat`].
    Heartbeat(Heartbeat),
}

impl Message {
    /// Decode a payload as the given message type.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure of the payload.
    pub fn decode(kind: MessageKind, payload: &Value) -> Result<Self> {
        Ok(match kind {
            MessageKind::RegisterPeer => Self::RegisterPeer(RegisterPeer::decode(payload)?),
            MessageKind::RemovePeer => Self::RemovePeer(RemovePeer::decode(payload)?),
            MessageKind::Ping => Self::Ping(Ping::decode(payload)?),
            MessageKind::RestartClock => Self::RestartClock(RestartClock::decode(payload)?),
            MessageKind::RequestTime => Self::RequestTime(RequestTime::decode(payload)?),
            MessageKind::ResponseTime => Self::ResponseTime(ResponseTime::decode(payload)?),
            MessageKind::UpdateTime => Self::UpdateTime(UpdateTime::decode(payload)?),
            MessageKind::Heartbeat => Self::Heartbeat(Heartbeat::decode(payload)?),
        })
    }

    /// Encode as a JSON payload.
    #[must_use]
    pub fn encode(&self) -> Value {
        match self {
            Self::RegisterPeer(m) => m.encode(),
            Self::RemovePeer(m) => m.encode(),
            Self::Ping(m) => m.encode(),
            Self::RestartClock(m) => m.encode(),
            Self::RequestTime(m) => m.encode(),
            Self::ResponseTime(m) => m.encode(),
            Self::UpdateTime(m) => m.encode(),
            Self::Heartbeat(m) => m.encode(),
        }
    }

    /// Message type.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::RegisterPeer(_) => MessageKind::RegisterPeer,
            Self::RemovePeer(_) => MessageKind::RemovePeer,
            Self::Ping(_) => MessageKind::Ping,
            Self::RestartClock(_) => MessageKind::RestartClock,
            Self::RequestTime(_) => MessageKind::RequestTime,
            Self::ResponseTime(_) => MessageKind::ResponseTime,
            Self::UpdateTime(_) => MessageKind::UpdateTime,
            Self::Heartbeat(_) => MessageKind::Heartbeat,
        }
    }

    /// Peer the message concerns.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::RegisterPeer(m) => m.peer_id(),
            Self::RemovePeer(m) => m.peer_id(),
            Self::Ping(m) => m.peer_id(),
            Self::RestartClock(m) => m.peer_id(),
            Self::RequestTime(m) => m.peer_id(),
            Self::ResponseTime(m) => m.peer_id(),
            Self::UpdateTime(m) => m.peer_id(),
            Self::Heartbeat(m) => m.peer_id(),
        }
    }
}

macro_rules! impl_from_message {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(message: $variant) -> Self {
                    Self::$variant(message)
                }
            }
        )*
    };
}

impl_from_message!(
    RegisterPeer,
    RemovePeer,
    Ping,
    RestartClock,
    RequestTime,
    ResponseTime,
    UpdateTime,
    Heartbeat,
);
