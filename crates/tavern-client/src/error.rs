//! Error types for the client layer.

use tavern_protocol::RoomCode;

/// Errors returned by the client transport and sync client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport was closed; it sends nothing more.
    #[error("transport is closed")]
    Closed,

    /// The operation needs a bound room and there is none.
    #[error("no room is bound")]
    NoRoom,

    /// The room was opened but its snapshot has not arrived yet.
    #[error("waiting for the snapshot of room {0}")]
    NotReady(RoomCode),

    /// A room's state must be a JSON object so it can carry its version.
    #[error("state of room {0} is not a JSON object")]
    NotAnObject(RoomCode),
}
