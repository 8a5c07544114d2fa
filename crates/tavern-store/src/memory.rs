//! In-process snapshot storage.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tavern_protocol::RoomCode;

use crate::{SnapshotStore, StoreError, StoredSnapshot};

/// Keeps snapshots in a map. Contents are lost when the process exits.
///
/// Cloning is cheap and clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    rooms: Arc<RwLock<HashMap<RoomCode, StoredSnapshot>>>,
}

impl MemorySnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with a stored snapshot.
    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    /// Returns `true` if nothing has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    async fn check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn read(&self, room: &RoomCode) -> Result<Option<StoredSnapshot>, StoreError> {
        Ok(self.rooms.read().get(room).cloned())
    }

    async fn write(&self, room: &RoomCode, state: Value) -> Result<StoredSnapshot, StoreError> {
        let record = StoredSnapshot::new(room.clone(), state);
        self.rooms.write().insert(room.clone(), record.clone());
        Ok(record)
    }
}
