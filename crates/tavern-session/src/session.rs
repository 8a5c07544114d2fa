//! Session types: one connection's room binding and lifecycle.

use tavern_protocol::RoomCode;
use tavern_transport::ConnectionId;

use crate::SessionError;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a connection stands.
///
/// ```text
///   Unbound ──(join)──→ Bound(room) ──(leave)──→ Unbound
///      │                    │  ↺ (join other room: leave, then join)
///      └──────(close)───────┴──────→ Closed
/// ```
///
/// `Closed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not in any room.
    Unbound,
    /// Connected and bound to a room.
    Bound(RoomCode),
    /// The connection is gone.
    Closed,
}

// ---------------------------------------------------------------------------
// JoinPlan
// ---------------------------------------------------------------------------

/// The membership changes a join requires, in order: leave first, then
/// join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    /// Room to leave before joining, when the session was bound elsewhere.
    pub leave: Option<RoomCode>,
    /// Room to join.
    pub join: RoomCode,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The relay's record of one connection.
#[derive(Debug, Clone)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    /// A fresh, unbound session for connection `id`.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Unbound,
        }
    }

    /// The connection this session belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The bound room, if any.
    pub fn room(&self) -> Option<&RoomCode> {
        match &self.state {
            SessionState::Bound(room) => Some(room),
            _ => None,
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Binds the session to `room`.
    ///
    /// Joining the room already bound changes nothing and plans no leave.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session is closed.
    pub fn join(&mut self, room: RoomCode) -> Result<JoinPlan, SessionError> {
        let leave = match &self.state {
            SessionState::Closed => return Err(SessionError::Closed(self.id)),
            SessionState::Bound(current) if *current == room => None,
            SessionState::Bound(current) => Some(current.clone()),
            SessionState::Unbound => None,
        };

        if let Some(old) = &leave {
            tracing::debug!(conn_id = %self.id, from = %old, to = %room, "rebinding session");
        }
        self.state = SessionState::Bound(room.clone());
        Ok(JoinPlan { leave, join: room })
    }

    /// Unbinds the session. Returns the room it was bound to.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session is closed.
    pub fn leave(&mut self) -> Result<Option<RoomCode>, SessionError> {
        match std::mem::replace(&mut self.state, SessionState::Unbound) {
            SessionState::Closed => {
                self.state = SessionState::Closed;
                Err(SessionError::Closed(self.id))
            }
            SessionState::Bound(room) => Ok(Some(room)),
            SessionState::Unbound => Ok(None),
        }
    }

    /// Closes the session for good. Returns the room that still has to be
    /// left; calling it again returns `None`.
    pub fn close(&mut self) -> Option<RoomCode> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Bound(room) => Some(room),
            SessionState::Unbound | SessionState::Closed => None,
        }
    }

    /// The room a room-scoped request applies to: the room it names, or
    /// else the bound room.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session is closed.
    pub fn target(&self, explicit: Option<&RoomCode>) -> Result<Option<RoomCode>, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.id));
        }
        Ok(explicit.or_else(|| self.room()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(code: &str) -> RoomCode {
        RoomCode::parse(code).unwrap()
    }

    fn session() -> Session {
        Session::new(ConnectionId::new(1))
    }

    #[test]
    fn test_session_starts_unbound() {
        let s = session();
        assert_eq!(s.state(), &SessionState::Unbound);
        assert_eq!(s.room(), None);
    }

    #[test]
    fn test_join_from_unbound_plans_no_leave() {
        let mut s = session();
        let plan = s.join(room("A")).unwrap();
        assert_eq!(plan, JoinPlan { leave: None, join: room("A") });
        assert_eq!(s.room(), Some(&room("A")));
    }

    #[test]
    fn test_join_other_room_plans_leave_first() {
        let mut s = session();
        s.join(room("A")).unwrap();

        let plan = s.join(room("B")).unwrap();

        assert_eq!(plan.leave, Some(room("A")));
        assert_eq!(plan.join, room("B"));
        assert_eq!(s.state(), &SessionState::Bound(room("B")));
    }

    #[test]
    fn test_join_same_room_is_idempotent() {
        let mut s = session();
        s.join(room("A")).unwrap();
        let plan = s.join(room("A")).unwrap();
        assert_eq!(plan.leave, None);
        assert_eq!(s.room(), Some(&room("A")));
    }

    #[test]
    fn test_leave_returns_bound_room_then_none() {
        let mut s = session();
        s.join(room("A")).unwrap();
        assert_eq!(s.leave().unwrap(), Some(room("A")));
        assert_eq!(s.leave().unwrap(), None);
        assert_eq!(s.state(), &SessionState::Unbound);
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let mut s = session();
        s.join(room("A")).unwrap();

        assert_eq!(s.close(), Some(room("A")));
        assert_eq!(s.close(), None);
        assert!(s.is_closed());

        assert!(matches!(s.join(room("B")), Err(SessionError::Closed(_))));
        assert!(matches!(s.leave(), Err(SessionError::Closed(_))));
        assert!(matches!(s.target(None), Err(SessionError::Closed(_))));
        assert!(s.is_closed(), "failed leave must not reopen the session");
    }

    #[test]
    fn test_target_prefers_explicit_room() {
        let mut s = session();
        assert_eq!(s.target(None).unwrap(), None);

        s.join(room("A")).unwrap();
        assert_eq!(s.target(None).unwrap(), Some(room("A")));
        assert_eq!(s.target(Some(&room("B"))).unwrap(), Some(room("B")));
    }
}
