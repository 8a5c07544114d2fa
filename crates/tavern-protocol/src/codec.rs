//! Codec trait and implementations for serializing/deserializing messages.
//!
//! The relay and the client never call `serde_json` directly; they go
//! through a [`Codec`] so the frame format is chosen in one place.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Frames are UTF-8 JSON text, which is what browser clients of the relay
/// send and expect.
///
/// ## Example
///
/// ```rust
/// use tavern_protocol::{Codec, Envelope, JsonCodec, RoomCode};
///
/// let codec = JsonCodec;
/// let room = RoomCode::parse("abc123").unwrap();
///
/// let bytes = codec.encode(&Envelope::join(room.clone())).unwrap();
/// assert_eq!(bytes, br#"{"type":"join","room":"ABC123"}"#);
///
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded.room, Some(room));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
