//! Runtime choice between snapshot store backends.

use serde_json::Value;
use tavern_protocol::RoomCode;

#[cfg(feature = "redis")]
use crate::RedisSnapshotStore;
use crate::{
    FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoreError,
    StoredSnapshot,
};

/// One of the available backends, chosen by configuration.
#[derive(Clone)]
pub enum StoreBackend {
    Memory(MemorySnapshotStore),
    File(FileSnapshotStore),
    #[cfg(feature = "redis")]
    Redis(RedisSnapshotStore),
}

impl StoreBackend {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::File(_) => "file",
            #[cfg(feature = "redis")]
            Self::Redis(_) => "redis",
        }
    }
}

impl From<MemorySnapshotStore> for StoreBackend {
    fn from(store: MemorySnapshotStore) -> Self {
        Self::Memory(store)
    }
}

impl From<FileSnapshotStore> for StoreBackend {
    fn from(store: FileSnapshotStore) -> Self {
        Self::File(store)
    }
}

#[cfg(feature = "redis")]
impl From<RedisSnapshotStore> for StoreBackend {
    fn from(store: RedisSnapshotStore) -> Self {
        Self::Redis(store)
    }
}

impl SnapshotStore for StoreBackend {
    async fn check(&self) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.check().await,
            Self::File(s) => s.check().await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.check().await,
        }
    }

    async fn read(&self, room: &RoomCode) -> Result<Option<StoredSnapshot>, StoreError> {
        match self {
            Self::Memory(s) => s.read(room).await,
            Self::File(s) => s.read(room).await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.read(room).await,
        }
    }

    async fn write(&self, room: &RoomCode, state: Value) -> Result<StoredSnapshot, StoreError> {
        match self {
            Self::Memory(s) => s.write(room, state).await,
            Self::File(s) => s.write(room, state).await,
            #[cfg(feature = "redis")]
            Self::Redis(s) => s.write(room, state).await,
        }
    }
}
