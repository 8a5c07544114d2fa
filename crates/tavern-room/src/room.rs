//! A single room: its members and their delivery channels.

use std::collections::HashMap;
use std::sync::Arc;

use tavern_protocol::RoomCode;
use tavern_transport::ConnectionId;
use tokio::sync::mpsc;

/// An encoded message, shared by every recipient of one broadcast.
pub type Frame = Arc<Vec<u8>>;

/// Channel feeding one connection's writer task.
///
/// The writer drops its receiver when the socket goes away, which makes
/// the outbox report itself closed.
pub type Outbox = mpsc::UnboundedSender<Frame>;

/// The members of one room.
#[derive(Debug)]
pub(crate) struct Room {
    code: RoomCode,
    members: HashMap<ConnectionId, Outbox>,
}

impl Room {
    pub(crate) fn new(code: RoomCode) -> Self {
        Self {
            code,
            members: HashMap::new(),
        }
    }

    /// Number of bound connections.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` once the last member has left.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member IDs in ascending order.
    pub fn member_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.members.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Adds or replaces a member. Returns `true` if it was new.
    pub(crate) fn insert(&mut self, id: ConnectionId, outbox: Outbox) -> bool {
        self.members.insert(id, outbox).is_none()
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> bool {
        self.members.remove(&id).is_some()
    }

    /// Hands `frame` to every writable member except `exclude`.
    ///
    /// A member whose channel is closed, or whose send fails, is skipped.
    /// Returns how many members accepted the frame.
    pub(crate) fn deliver(&self, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for (id, outbox) in &self.members {
            if Some(*id) == exclude || outbox.is_closed() {
                continue;
            }
            if outbox.send(Arc::clone(frame)).is_ok() {
                delivered += 1;
            } else {
                tracing::trace!(room = %self.code, conn_id = %id, "member outbox closed mid-send");
            }
        }
        delivered
    }
}
