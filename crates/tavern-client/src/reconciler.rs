//! Version-based snapshot reconciliation.
//!
//! The reconciler keeps the last known snapshot of every room the client
//! has seen and decides, by version number alone, whether an incoming
//! snapshot replaces it. It also tracks which room the client is working
//! in and whether that room's state has arrived yet.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tavern_protocol::{Envelope, RoomCode, kind, set_snapshot_version, snapshot_version};

use crate::ClientError;

/// The locally held state of one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// The snapshot blob.
    pub payload: Value,
    /// Its version.
    pub version: u64,
}

impl RoomRecord {
    /// A record whose version is read from the payload.
    pub fn from_payload(payload: Value) -> Self {
        let version = snapshot_version(&payload);
        Self { payload, version }
    }
}

/// The result of offering a snapshot to [`Reconciler::adopt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// The room was unknown; the snapshot was taken as is.
    Created,
    /// The snapshot was newer and replaced the local one.
    Replaced { previous: u64 },
    /// The snapshot was not newer (or was null) and was dropped.
    Ignored,
}

/// Which room the client is working in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomBinding {
    /// No room opened yet.
    NoRoom,
    /// Working on a room whose state was already held locally.
    BoundLocal(RoomCode),
    /// Opened a room we know nothing about; waiting for its snapshot.
    PendingRemote(RoomCode),
    /// The awaited snapshot arrived.
    BoundRemote(RoomCode),
}

impl RoomBinding {
    /// The room involved, whatever the state.
    pub fn room(&self) -> Option<&RoomCode> {
        match self {
            Self::NoRoom => None,
            Self::BoundLocal(room) | Self::PendingRemote(room) | Self::BoundRemote(room) => {
                Some(room)
            }
        }
    }

    /// The room, if its state is available for editing.
    pub fn ready_room(&self) -> Option<&RoomCode> {
        match self {
            Self::BoundLocal(room) | Self::BoundRemote(room) => Some(room),
            Self::NoRoom | Self::PendingRemote(_) => None,
        }
    }
}

/// What [`Reconciler::open`] found.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// The room's state is already held; nothing to send.
    Local,
    /// The room is unknown; send this request and wait.
    Pending(Envelope),
}

/// What the client should do about an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// A snapshot was adopted.
    Adopted {
        room: RoomCode,
        version: u64,
        adoption: Adoption,
    },
    /// Send this envelope back.
    Reply(Envelope),
    /// Nothing to do.
    Ignored,
}

/// Known rooms plus the current binding.
#[derive(Debug)]
pub struct Reconciler {
    rooms: HashMap<RoomCode, RoomRecord>,
    binding: RoomBinding,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    /// An empty reconciler with no room bound.
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            binding: RoomBinding::NoRoom,
        }
    }

    /// A reconciler preloaded with rooms held from an earlier run.
    pub fn with_rooms(rooms: impl IntoIterator<Item = (RoomCode, RoomRecord)>) -> Self {
        Self {
            rooms: rooms.into_iter().collect(),
            binding: RoomBinding::NoRoom,
        }
    }

    /// The current binding.
    pub fn binding(&self) -> &RoomBinding {
        &self.binding
    }

    /// The record held for `room`.
    pub fn record(&self, room: &RoomCode) -> Option<&RoomRecord> {
        self.rooms.get(room)
    }

    /// The record of the bound room, once it is ready.
    pub fn bound_record(&self) -> Option<&RoomRecord> {
        self.binding.ready_room().and_then(|room| self.rooms.get(room))
    }

    /// Offers a snapshot for `room`.
    ///
    /// An unknown room takes it verbatim. A known room takes it only if
    /// its version is strictly greater than the local one. A `null`
    /// payload is never taken.
    pub fn adopt(&mut self, room: &RoomCode, payload: Value) -> Adoption {
        if payload.is_null() {
            return Adoption::Ignored;
        }
        let incoming = RoomRecord::from_payload(payload);

        let adoption = match self.rooms.get_mut(room) {
            None => {
                self.rooms.insert(room.clone(), incoming);
                Adoption::Created
            }
            Some(local) if incoming.version > local.version => {
                let previous = local.version;
                *local = incoming;
                Adoption::Replaced { previous }
            }
            Some(_) => Adoption::Ignored,
        };

        if adoption != Adoption::Ignored && self.binding == RoomBinding::PendingRemote(room.clone()) {
            self.binding = RoomBinding::BoundRemote(room.clone());
        }
        adoption
    }

    /// Starts a new room with `payload` at version 1, binds it, and
    /// returns the snapshot broadcast announcing it.
    ///
    /// # Errors
    /// [`ClientError::NotAnObject`] if `payload` is not a JSON object.
    /// Nothing is stored or bound in that case.
    pub fn create(&mut self, room: RoomCode, mut payload: Value) -> Result<Envelope, ClientError> {
        if !set_snapshot_version(&mut payload, 1) {
            return Err(ClientError::NotAnObject(room));
        }
        self.rooms.insert(
            room.clone(),
            RoomRecord {
                payload: payload.clone(),
                version: 1,
            },
        );
        self.binding = RoomBinding::BoundLocal(room.clone());
        Ok(Envelope::broadcast(room, kind::SNAPSHOT, payload))
    }

    /// Binds `room`. If its state is not held yet, the binding waits for
    /// it and the returned request must be sent. There is no timeout.
    pub fn open(&mut self, room: RoomCode) -> OpenOutcome {
        if self.rooms.contains_key(&room) {
            self.binding = RoomBinding::BoundLocal(room);
            OpenOutcome::Local
        } else {
            self.binding = RoomBinding::PendingRemote(room.clone());
            OpenOutcome::Pending(Envelope::request_snapshot(room))
        }
    }

    /// Edits the bound room's payload, bumps its version by one, and
    /// returns the snapshot broadcast carrying the result.
    ///
    /// Whatever `version` the edit writes is overwritten. The edit runs on
    /// a copy; the record changes only if the edit leaves an object.
    ///
    /// # Errors
    /// [`ClientError::NoRoom`] when nothing is bound,
    /// [`ClientError::NotReady`] while the room's snapshot is pending, and
    /// [`ClientError::NotAnObject`] if the edit leaves a non-object.
    pub fn mutate<F>(&mut self, edit: F) -> Result<Envelope, ClientError>
    where
        F: FnOnce(&mut Value),
    {
        let room = match &self.binding {
            RoomBinding::BoundLocal(room) | RoomBinding::BoundRemote(room) => room.clone(),
            RoomBinding::PendingRemote(room) => return Err(ClientError::NotReady(room.clone())),
            RoomBinding::NoRoom => return Err(ClientError::NoRoom),
        };
        let record = self.rooms.get_mut(&room).ok_or(ClientError::NoRoom)?;

        let mut next = record.payload.clone();
        edit(&mut next);
        if !set_snapshot_version(&mut next, record.version + 1) {
            return Err(ClientError::NotAnObject(room));
        }
        record.version += 1;
        record.payload = next;

        Ok(Envelope::broadcast(room, kind::SNAPSHOT, record.payload.clone()))
    }

    /// Reacts to one inbound envelope. `default_room` is used when the
    /// envelope names none.
    pub fn handle(&mut self, envelope: &Envelope, default_room: &RoomCode) -> Reaction {
        let room = envelope.room.as_ref().unwrap_or(default_room);

        match envelope.kind.as_str() {
            kind::SNAPSHOT => {
                let Some(payload) = &envelope.payload else {
                    return Reaction::Ignored;
                };
                match self.adopt(room, payload.clone()) {
                    Adoption::Ignored => Reaction::Ignored,
                    adoption => Reaction::Adopted {
                        room: room.clone(),
                        version: self.rooms.get(room).map_or(0, |r| r.version),
                        adoption,
                    },
                }
            }
            kind::REQUEST_SNAPSHOT => {
                if self.binding.ready_room() != Some(room) {
                    return Reaction::Ignored;
                }
                match self.rooms.get(room) {
                    Some(record) => Reaction::Reply(Envelope::broadcast(
                        room.clone(),
                        kind::SNAPSHOT,
                        record.payload.clone(),
                    )),
                    None => Reaction::Ignored,
                }
            }
            _ => Reaction::Ignored,
        }
    }
}
