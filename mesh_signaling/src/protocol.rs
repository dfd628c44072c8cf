//! Wire protocol between participants and the signaling server
//!
//! Messages are JSON objects tagged by `"type"`:
//!
//! ```json
//! {"type": "join", "room": "R1"}
//! {"type": "handshake-offer", "target": "<uuid>", "payload": ...}
//! {"type": "existing-members", "ids": ["<uuid>"]}
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::value::{RawValue, to_raw_value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Channel-scoped participant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Generate a fresh identifier for a newly connected channel
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for ParticipantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ParticipantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Room identifier
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handshake payload (session description or connectivity candidate)
///
/// Holds the raw JSON text exactly as the sender wrote it and writes it back
/// out unchanged: key order, number spelling and whitespace are preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Wrap a JSON document; fails if `json` is not valid JSON
    pub fn from_json(json: impl Into<String>) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.into()).map(Self)
    }

    pub fn null() -> Self {
        Self(RawValue::NULL.to_owned())
    }

    /// The payload's JSON text
    pub fn as_json(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_json() == other.as_json()
    }
}

/// JSON string payload
impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        to_raw_value(value).map(Self).unwrap_or_else(|_| Self::null())
    }
}

/// Events a participant sends to the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundEvent {
    Join { room: RoomId },
    HandshakeOffer { target: ParticipantId, payload: Payload },
    HandshakeAnswer { target: ParticipantId, payload: Payload },
    KeepAlive,
}

/// Events the server sends to a participant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// First event on every channel
    IdAssigned { id: ParticipantId },
    /// Room members that joined before the recipient, in join order
    ExistingMembers { ids: Vec<ParticipantId> },
    ParticipantJoined { id: ParticipantId },
    ParticipantLeft { id: ParticipantId },
    IncomingHandshakeOffer { from: ParticipantId, payload: Payload },
    IncomingHandshakeAnswer { from: ParticipantId, payload: Payload },
    RoomFull { room: RoomId },
}

const INBOUND_TYPES: &[&str] = &["join", "handshake-offer", "handshake-answer", "keep-alive"];

const OUTBOUND_TYPES: &[&str] = &[
    "id-assigned",
    "existing-members",
    "participant-joined",
    "participant-left",
    "incoming-handshake-offer",
    "incoming-handshake-answer",
    "room-full",
];

/// Flat view of a tagged message
///
/// serde's internally tagged enums buffer their fields, which a `RawValue`
/// payload cannot pass through, so both event enums deserialize via this.
#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    room: Option<RoomId>,
    target: Option<ParticipantId>,
    id: Option<ParticipantId>,
    ids: Option<Vec<ParticipantId>>,
    from: Option<ParticipantId>,
    payload: Option<Payload>,
}

fn field<T, E: de::Error>(value: Option<T>, name: &'static str) -> Result<T, E> {
    value.ok_or_else(|| E::missing_field(name))
}

impl<'de> Deserialize<'de> for InboundEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEvent::deserialize(deserializer)?;
        // A JSON `null` payload arrives as `None`.
        let payload = wire.payload.unwrap_or_else(Payload::null);
        Ok(match wire.kind.as_str() {
            "join" => InboundEvent::Join {
                room: field(wire.room, "room")?,
            },
            "handshake-offer" => InboundEvent::HandshakeOffer {
                target: field(wire.target, "target")?,
                payload,
            },
            "handshake-answer" => InboundEvent::HandshakeAnswer {
                target: field(wire.target, "target")?,
                payload,
            },
            "keep-alive" => InboundEvent::KeepAlive,
            other => return Err(de::Error::unknown_variant(other, INBOUND_TYPES)),
        })
    }
}

impl<'de> Deserialize<'de> for OutboundEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEvent::deserialize(deserializer)?;
        let payload = wire.payload.unwrap_or_else(Payload::null);
        Ok(match wire.kind.as_str() {
            "id-assigned" => OutboundEvent::IdAssigned {
                id: field(wire.id, "id")?,
            },
            "existing-members" => OutboundEvent::ExistingMembers {
                ids: field(wire.ids, "ids")?,
            },
            "participant-joined" => OutboundEvent::ParticipantJoined {
                id: field(wire.id, "id")?,
            },
            "participant-left" => OutboundEvent::ParticipantLeft {
                id: field(wire.id, "id")?,
            },
            "incoming-handshake-offer" => OutboundEvent::IncomingHandshakeOffer {
                from: field(wire.from, "from")?,
                payload,
            },
            "incoming-handshake-answer" => OutboundEvent::IncomingHandshakeAnswer {
                from: field(wire.from, "from")?,
                payload,
            },
            "room-full" => OutboundEvent::RoomFull {
                room: field(wire.room, "room")?,
            },
            other => return Err(de::Error::unknown_variant(other, OUTBOUND_TYPES)),
        })
    }
}

macro_rules! json_display {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }

        impl FromStr for $ty {
            type Err = serde_json::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                serde_json::from_str(s)
            }
        }
    };
}

json_display!(InboundEvent);
json_display!(OutboundEvent);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_uses_kebab_case_tag() {
        let event = InboundEvent::from_str(r#"{"type":"join","room":"R1"}"#).unwrap();
        assert_eq!(event, InboundEvent::Join { room: RoomId::new("R1") });
    }

    #[test]
    fn offer_payload_text_is_kept_verbatim() {
        let target = ParticipantId::random();
        let payload = r#"{"type":"offer","sdp":"v=0\r\n","ssrc":123456789012345678901234567890,"ts":1.00000000000000000001}"#;
        let wire = format!(r#"{{"type":"handshake-offer","target":"{target}","payload":{payload}}}"#);

        let event = InboundEvent::from_str(&wire).unwrap();
        let InboundEvent::HandshakeOffer { target: parsed, payload: parsed_payload } = event else {
            panic!("expected an offer");
        };
        assert_eq!(parsed, target);
        assert_eq!(parsed_payload.as_json(), payload);
    }

    #[test]
    fn null_or_missing_payload_is_null() {
        let target = ParticipantId::random();
        for wire in [
            format!(r#"{{"type":"handshake-answer","target":"{target}","payload":null}}"#),
            format!(r#"{{"type":"handshake-answer","target":"{target}"}}"#),
        ] {
            let event = InboundEvent::from_str(&wire).unwrap();
            assert_eq!(
                event,
                InboundEvent::HandshakeAnswer {
                    target,
                    payload: Payload::null()
                }
            );
        }
    }

    #[test]
    fn outbound_round_trips_through_text() {
        let from = ParticipantId::random();
        let event = OutboundEvent::IncomingHandshakeAnswer {
            from,
            payload: Payload::from_json(r#"{"b":1,"a":[2,3]}"#).unwrap(),
        };
        let text = event.to_string();
        assert_eq!(
            text,
            format!(r#"{{"type":"incoming-handshake-answer","from":"{from}","payload":{{"b":1,"a":[2,3]}}}}"#)
        );
        assert_eq!(OutboundEvent::from_str(&text).unwrap(), event);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let err = InboundEvent::from_str(r#"{"type":"join"}"#).unwrap_err();
        assert!(err.to_string().contains("room"));
    }

    #[test]
    fn string_payload_is_json_string() {
        assert_eq!(Payload::from("sdp1").as_json(), r#""sdp1""#);
        assert!(Payload::from_json("not json").is_err());
    }

    #[test]
    fn outbound_display_is_json() {
        let id = ParticipantId::random();
        let text = OutboundEvent::ExistingMembers { ids: vec![id] }.to_string();
        assert_eq!(text, format!(r#"{{"type":"existing-members","ids":["{id}"]}}"#));
    }

    #[test]
    fn keep_alive_has_no_fields() {
        assert_eq!(InboundEvent::KeepAlive.to_string(), r#"{"type":"keep-alive"}"#);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(InboundEvent::from_str(r#"{"type":"leave"}"#).is_err());
    }
}
