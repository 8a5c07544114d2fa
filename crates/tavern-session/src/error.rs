//! Error types for the session layer.

use tavern_transport::ConnectionId;

/// Errors that can occur while driving a connection session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session was closed; it accepts no further operations.
    #[error("session {0} is closed")]
    Closed(ConnectionId),
}
