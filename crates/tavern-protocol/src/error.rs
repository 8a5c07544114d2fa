//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
///
/// A `ProtocolError` always means the bytes or the message shape were
/// wrong, never that the network or the store failed.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, or an
    /// invalid room code.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but is missing a field its kind requires.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The envelope carries a `type` this side does not handle.
    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    /// A room code is empty, too long, or not alphanumeric.
    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),
}
