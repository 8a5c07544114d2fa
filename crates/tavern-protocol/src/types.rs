//! Core protocol types for Tavern's wire format.
//!
//! Every frame on the wire is one [`Envelope`]: a flat JSON object whose
//! `type` field says what it is. The relay turns the envelopes it accepts
//! into typed [`Request`]s; anything it does not recognise stays an
//! envelope and is ignored.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

/// The `type` strings understood by the relay and the client.
pub mod kind {
    /// Client → server: bind this connection to a room.
    pub const JOIN: &str = "join";
    /// Client → server: unbind from the current room.
    pub const LEAVE: &str = "leave";
    /// Client → server: relay `payload` to the room as `innerType`.
    pub const BROADCAST: &str = "broadcast";
    /// Client → server: persist and relay a full snapshot.
    pub const SAVE: &str = "save";
    /// Both directions: a full snapshot of a room's state.
    pub const SNAPSHOT: &str = "snapshot";
    /// Client → server: ask for the room's snapshot.
    pub const RESTORE: &str = "restore";
    /// Both directions: ask for the room's snapshot.
    pub const REQUEST_SNAPSHOT: &str = "request_snapshot";
    /// Client → server: relay an incremental change without persisting it.
    pub const PATCH: &str = "patch";

    /// Returns `true` for kinds whose payload is a full snapshot that the
    /// relay persists.
    pub fn is_snapshot(kind: &str) -> bool {
        kind == SNAPSHOT || kind == SAVE
    }
}

// ---------------------------------------------------------------------------
// RoomCode
// ---------------------------------------------------------------------------

/// Characters used for generated room codes. Ambiguous glyphs (`0`, `O`,
/// `1`, `I`) are left out so codes can be read aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated room code.
const GENERATED_CODE_LEN: usize = 6;

/// A short alphanumeric room identifier, always stored upper-case.
///
/// Deserialization goes through [`RoomCode::parse`], so an envelope with a
/// malformed room code fails to decode as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Longest accepted room code.
    pub const MAX_LEN: usize = 32;

    /// Normalises (trim, upper-case) and validates a room code.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidRoomCode`] if the code is empty,
    /// longer than [`MAX_LEN`](Self::MAX_LEN), or contains anything but
    /// ASCII letters and digits.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty()
            || code.len() > Self::MAX_LEN
            || !code.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(ProtocolError::InvalidRoomCode(raw.to_string()));
        }
        Ok(Self(code))
    }

    /// Generates a random six-character code.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..GENERATED_CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl AsRef<str> for RoomCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Snapshot versions
// ---------------------------------------------------------------------------

/// Reads the `version` field a snapshot carries. Missing or non-integer
/// versions count as 0.
pub fn snapshot_version(state: &Value) -> u64 {
    state.get("version").and_then(Value::as_u64).unwrap_or(0)
}

/// Writes `version` into a snapshot. Returns `false` (and leaves the value
/// alone) if the snapshot is not a JSON object.
pub fn set_snapshot_version(state: &mut Value, version: u64) -> bool {
    match state.as_object_mut() {
        Some(obj) => {
            obj.insert("version".to_string(), Value::from(version));
            true
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Envelope — the wire format
// ---------------------------------------------------------------------------

/// One message on the wire.
///
/// ```text
/// { "type": "broadcast", "room": "ABC123", "innerType": "snapshot", "payload": {...} }
/// ```
///
/// `innerKind` is accepted for `innerType`, and the legacy field names
/// `snapshot` and `patch` are accepted for `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// What the message is (`join`, `broadcast`, `snapshot`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// The room the message targets, if it names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomCode>,

    /// For `broadcast`: the `type` peers will see.
    #[serde(
        rename = "innerType",
        alias = "innerKind",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub inner_kind: Option<String>,

    /// Opaque content. A JSON `null` payload decodes as `None`.
    #[serde(
        default,
        alias = "snapshot",
        alias = "patch",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
}

impl Envelope {
    /// An envelope with only a `type`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            room: None,
            inner_kind: None,
            payload: None,
        }
    }

    /// `{type: "join", room}`.
    pub fn join(room: RoomCode) -> Self {
        Self {
            room: Some(room),
            ..Self::new(kind::JOIN)
        }
    }

    /// `{type: "broadcast", room, innerType, payload}`.
    pub fn broadcast(room: RoomCode, inner_kind: impl Into<String>, payload: Value) -> Self {
        Self {
            room: Some(room),
            inner_kind: Some(inner_kind.into()),
            payload: Some(payload),
            ..Self::new(kind::BROADCAST)
        }
    }

    /// `{type: "save", room, payload}`.
    pub fn save(room: RoomCode, payload: Value) -> Self {
        Self {
            room: Some(room),
            payload: Some(payload),
            ..Self::new(kind::SAVE)
        }
    }

    /// `{type: "request_snapshot", room}`.
    pub fn request_snapshot(room: RoomCode) -> Self {
        Self {
            room: Some(room),
            ..Self::new(kind::REQUEST_SNAPSHOT)
        }
    }

    /// `{type: "snapshot", room, payload}`, with an explicit `null` payload
    /// when the room has no snapshot.
    pub fn snapshot(room: RoomCode, state: Option<Value>) -> Self {
        Self {
            room: Some(room),
            payload: Some(state.unwrap_or(Value::Null)),
            ..Self::new(kind::SNAPSHOT)
        }
    }

    /// What the relay forwards to peers: the sender's inner kind as `type`,
    /// payload untouched.
    pub fn relayed(kind: impl Into<String>, room: Option<RoomCode>, payload: Value) -> Self {
        Self {
            room,
            payload: Some(payload),
            ..Self::new(kind)
        }
    }
}

// ---------------------------------------------------------------------------
// Request — what the relay acts on
// ---------------------------------------------------------------------------

/// A client → server message the relay knows how to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Bind the connection to `room`.
    Join { room: RoomCode },

    /// Unbind the connection from its room.
    Leave,

    /// Relay `payload` to the room's other members as `inner_kind`.
    Broadcast {
        room: Option<RoomCode>,
        inner_kind: String,
        payload: Option<Value>,
    },

    /// Persist `payload` as the room's snapshot and relay it.
    Save { room: Option<RoomCode>, payload: Value },

    /// Reply with the room's snapshot.
    RequestSnapshot { room: Option<RoomCode> },

    /// Relay an incremental change; never persisted.
    Patch {
        room: Option<RoomCode>,
        payload: Option<Value>,
    },
}

impl Request {
    /// The room the request names explicitly, if any.
    pub fn room(&self) -> Option<&RoomCode> {
        match self {
            Self::Join { room } => Some(room),
            Self::Leave => None,
            Self::Broadcast { room, .. }
            | Self::Save { room, .. }
            | Self::RequestSnapshot { room }
            | Self::Patch { room, .. } => room.as_ref(),
        }
    }
}

impl TryFrom<Envelope> for Request {
    type Error = ProtocolError;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        match env.kind.as_str() {
            kind::JOIN => {
                let room = env.room.ok_or_else(|| {
                    ProtocolError::InvalidMessage("join without room".into())
                })?;
                Ok(Self::Join { room })
            }
            kind::LEAVE => Ok(Self::Leave),
            kind::BROADCAST => {
                let inner_kind = env.inner_kind.ok_or_else(|| {
                    ProtocolError::InvalidMessage("broadcast without innerType".into())
                })?;
                Ok(Self::Broadcast {
                    room: env.room,
                    inner_kind,
                    payload: env.payload,
                })
            }
            kind::SAVE | kind::SNAPSHOT => {
                let payload = env.payload.ok_or_else(|| {
                    ProtocolError::InvalidMessage("snapshot without payload".into())
                })?;
                Ok(Self::Save {
                    room: env.room,
                    payload,
                })
            }
            kind::RESTORE | kind::REQUEST_SNAPSHOT => {
                Ok(Self::RequestSnapshot { room: env.room })
            }
            kind::PATCH => Ok(Self::Patch {
                room: env.room,
                payload: env.payload,
            }),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Tests for protocol types and their JSON shape.
    //!
    //! Browser clients build these objects by hand, so the exact field
    //! names matter as much as the Rust types.

    use serde_json::json;

    use super::*;

    fn room(code: &str) -> RoomCode {
        RoomCode::parse(code).unwrap()
    }

    fn decode(json: Value) -> Envelope {
        serde_json::from_value(json).unwrap()
    }

    // =====================================================================
    // RoomCode
    // =====================================================================

    #[test]
    fn test_room_code_parse_normalizes_case_and_whitespace() {
        assert_eq!(room("  abc123 ").as_str(), "ABC123");
    }

    #[test]
    fn test_room_code_parse_rejects_bad_input() {
        for raw in ["", "   ", "AB-12", "room code", &"A".repeat(33)] {
            assert!(
                matches!(RoomCode::parse(raw), Err(ProtocolError::InvalidRoomCode(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_room_code_generate_uses_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = RoomCode::generate();
            assert_eq!(code.as_str().len(), 6);
            assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_room_code_serializes_as_plain_string() {
        let json = serde_json::to_string(&room("abc123")).unwrap();
        assert_eq!(json, "\"ABC123\"");
    }

    #[test]
    fn test_room_code_deserialize_normalizes() {
        let code: RoomCode = serde_json::from_str("\"xyz9\"").unwrap();
        assert_eq!(code, room("XYZ9"));
    }

    // =====================================================================
    // Snapshot versions
    // =====================================================================

    #[test]
    fn test_snapshot_version_missing_is_zero() {
        assert_eq!(snapshot_version(&json!({"name": "Curse"})), 0);
        assert_eq!(snapshot_version(&json!("scalar")), 0);
        assert_eq!(snapshot_version(&json!({"version": 7})), 7);
    }

    #[test]
    fn test_set_snapshot_version_only_on_objects() {
        let mut obj = json!({"version": 1});
        assert!(set_snapshot_version(&mut obj, 2));
        assert_eq!(obj["version"], 2);

        let mut list = json!([1, 2]);
        assert!(!set_snapshot_version(&mut list, 2));
        assert_eq!(list, json!([1, 2]));
    }

    // =====================================================================
    // Envelope JSON shape
    // =====================================================================

    #[test]
    fn test_envelope_broadcast_json_format() {
        let env = Envelope::broadcast(room("ABC123"), kind::SNAPSHOT, json!({"version": 2}));
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(
            json,
            json!({
                "type": "broadcast",
                "room": "ABC123",
                "innerType": "snapshot",
                "payload": {"version": 2}
            })
        );
    }

    #[test]
    fn test_envelope_snapshot_reply_keeps_explicit_null() {
        let env = Envelope::snapshot(room("ABC123"), None);
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(json["type"], "snapshot");
        assert!(json.as_object().unwrap().contains_key("payload"));
        assert!(json["payload"].is_null());
    }

    #[test]
    fn test_envelope_accepts_legacy_field_names() {
        let env = decode(json!({"type": "snapshot", "snapshot": {"version": 3}}));
        assert_eq!(env.payload, Some(json!({"version": 3})));

        let env = decode(json!({"type": "patch", "patch": [1]}));
        assert_eq!(env.payload, Some(json!([1])));

        let env = decode(json!({"type": "broadcast", "innerKind": "patch"}));
        assert_eq!(env.inner_kind.as_deref(), Some("patch"));
    }

    #[test]
    fn test_envelope_null_payload_decodes_as_none() {
        let env = decode(json!({"type": "snapshot", "room": "R1", "payload": null}));
        assert!(env.payload.is_none());
    }

    // =====================================================================
    // Request conversion
    // =====================================================================

    #[test]
    fn test_request_join_requires_room() {
        let req = Request::try_from(decode(json!({"type": "join", "room": "abc"}))).unwrap();
        assert_eq!(req, Request::Join { room: room("ABC") });

        let err = Request::try_from(decode(json!({"type": "join"})));
        assert!(matches!(err, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_request_save_and_snapshot_are_aliases() {
        for kind in ["save", "snapshot"] {
            let req = Request::try_from(decode(
                json!({"type": kind, "room": "R1", "payload": {"version": 1}}),
            ))
            .unwrap();
            assert!(matches!(req, Request::Save { .. }), "{kind}");
        }
    }

    #[test]
    fn test_request_save_without_payload_is_invalid() {
        let err = Request::try_from(decode(json!({"type": "save", "room": "R1"})));
        assert!(matches!(err, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_request_restore_and_request_snapshot_are_aliases() {
        for kind in ["restore", "request_snapshot"] {
            let req = Request::try_from(decode(json!({"type": kind, "room": "R1"}))).unwrap();
            assert_eq!(req, Request::RequestSnapshot { room: Some(room("R1")) });
        }
    }

    #[test]
    fn test_request_broadcast_requires_inner_type() {
        let err = Request::try_from(decode(json!({"type": "broadcast", "payload": 1})));
        assert!(matches!(err, Err(ProtocolError::InvalidMessage(_))));
    }

    #[test]
    fn test_request_unknown_kind() {
        let err = Request::try_from(decode(json!({"type": "typing"})));
        assert!(matches!(err, Err(ProtocolError::UnknownKind(k)) if k == "typing"));
    }

    #[test]
    fn test_request_room_prefers_explicit_room() {
        let req = Request::Patch { room: Some(room("R2")), payload: None };
        assert_eq!(req.room(), Some(&room("R2")));
        assert_eq!(Request::Leave.room(), None);
    }
}
