//! Room registry: tracks which connection is bound to which room.

use std::collections::HashMap;

use tavern_protocol::RoomCode;
use tavern_transport::ConnectionId;

use crate::{Frame, Outbox, Room};

/// What a [`RoomRegistry::join`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The room the connection was removed from first, if it was bound
    /// elsewhere.
    pub previous: Option<RoomCode>,
    /// `true` if this join brought the room into existence.
    pub created: bool,
}

/// All live rooms and the reverse index from connection to room.
///
/// Owned by a single task; nothing here is shared or locked.
///
/// Invariants:
/// - a connection is bound to at most one room,
/// - every room in the registry has at least one member.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomCode, Room>,
    bindings: HashMap<ConnectionId, RoomCode>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `id` to `room`, creating the room if needed.
    ///
    /// A connection already bound to a different room is removed from it
    /// first (and that room is deleted if it empties). Joining the room
    /// the connection is already in only refreshes its outbox.
    pub fn join(&mut self, id: ConnectionId, outbox: Outbox, room: RoomCode) -> JoinOutcome {
        let bound_elsewhere = self
            .bindings
            .get(&id)
            .is_some_and(|current| *current != room);
        let previous = if bound_elsewhere { self.leave(id) } else { None };

        let created = !self.rooms.contains_key(&room);
        let entry = self
            .rooms
            .entry(room.clone())
            .or_insert_with(|| Room::new(room.clone()));
        entry.insert(id, outbox);
        if created {
            tracing::debug!(%room, "room created");
        }
        tracing::debug!(%room, conn_id = %id, members = entry.len(), "joined room");

        self.bindings.insert(id, room);
        JoinOutcome { previous, created }
    }

    /// Unbinds `id` from its room. Returns the room it left, or `None` if
    /// it was not bound.
    pub fn leave(&mut self, id: ConnectionId) -> Option<RoomCode> {
        let room = self.bindings.remove(&id)?;

        if let Some(entry) = self.rooms.get_mut(&room) {
            entry.remove(id);
            tracing::debug!(%room, conn_id = %id, members = entry.len(), "left room");
            if entry.is_empty() {
                self.rooms.remove(&room);
                tracing::debug!(%room, "room removed");
            }
        }
        Some(room)
    }

    /// Sends `frame` to every member of `room` except `exclude`.
    ///
    /// At most once: members that cannot take the frame are skipped, and
    /// nothing is queued for later. Returns the number of members that
    /// accepted it; an unknown room yields 0.
    pub fn broadcast(&self, room: &RoomCode, frame: &Frame, exclude: Option<ConnectionId>) -> usize {
        self.rooms
            .get(room)
            .map_or(0, |entry| entry.deliver(frame, exclude))
    }

    /// The room `id` is bound to.
    pub fn room_of(&self, id: ConnectionId) -> Option<&RoomCode> {
        self.bindings.get(&id)
    }

    /// Members of `room` in ascending ID order (empty if unknown).
    pub fn members(&self, room: &RoomCode) -> Vec<ConnectionId> {
        self.rooms.get(room).map(Room::member_ids).unwrap_or_default()
    }

    /// Number of members of `room`.
    pub fn member_count(&self, room: &RoomCode) -> usize {
        self.rooms.get(room).map_or(0, Room::len)
    }

    /// Returns `true` if `room` currently has members.
    pub fn contains_room(&self, room: &RoomCode) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of bound connections across all rooms.
    pub fn connection_count(&self) -> usize {
        self.bindings.len()
    }
}
