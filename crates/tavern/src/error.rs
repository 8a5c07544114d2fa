//! Unified error type for Tavern.

use tavern_client::ClientError;
use tavern_protocol::ProtocolError;
use tavern_session::SessionError;
use tavern_store::StoreError;
use tavern_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` conversions let `?` lift any sub-crate error into it.
#[derive(Debug, thiserror::Error)]
pub enum TavernError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (operation on a closed session).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A snapshot store error (unreachable, not writable, corrupt).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A client-side error (closed transport, no room).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The relay task has stopped.
    #[error("relay is not running")]
    RelayStopped,
}

#[cfg(test)]
mod tests {
    use tavern_transport::ConnectionId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let tavern_err: TavernError = err.into();
        assert!(matches!(tavern_err, TavernError::Transport(_)));
        assert!(tavern_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidRoomCode("a b".into());
        let tavern_err: TavernError = err.into();
        assert!(matches!(tavern_err, TavernError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::Closed(ConnectionId::new(3));
        let tavern_err: TavernError = err.into();
        assert!(matches!(tavern_err, TavernError::Session(_)));
        assert!(tavern_err.to_string().contains("conn-3"));
    }

    #[test]
    fn test_from_store_error() {
        let err = StoreError::Unavailable("disk full".into());
        let tavern_err: TavernError = err.into();
        assert!(matches!(tavern_err, TavernError::Store(_)));
    }

    #[test]
    fn test_from_client_error() {
        let tavern_err: TavernError = ClientError::Closed.into();
        assert!(matches!(tavern_err, TavernError::Client(_)));
    }
}
