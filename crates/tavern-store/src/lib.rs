//! Persisted room snapshots for Tavern.
//!
//! A room has at most one [`StoredSnapshot`]: the last full state anybody
//! saved for it. The relay reads it when a connection joins and writes it
//! whenever a full snapshot passes through.
//!
//! Writes are plain upserts. Two writes racing for the same room resolve
//! by whichever lands last, whatever versions their payloads carry.
//!
//! # Backends
//!
//! - [`MemorySnapshotStore`]: a map in process memory.
//! - [`FileSnapshotStore`]: one JSON file per room.
//! - `RedisSnapshotStore` (feature `redis`): one key per room.
//! - [`StoreBackend`]: any of the above, picked at runtime.

mod backend;
mod error;
mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use backend::StoreBackend;
pub use error::StoreError;
pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisSnapshotStore;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tavern_protocol::{RoomCode, snapshot_version};

/// The persisted record for one room.
///
/// ```text
/// { "roomCode": "ABC123", "state": {...}, "updatedAt": "2026-01-01T00:00:00Z" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSnapshot {
    /// The room this snapshot belongs to.
    pub room_code: RoomCode,
    /// The opaque state blob, exactly as the client sent it.
    pub state: Value,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StoredSnapshot {
    /// Creates a record stamped with the current time.
    pub fn new(room_code: RoomCode, state: Value) -> Self {
        Self {
            room_code,
            state,
            updated_at: Utc::now(),
        }
    }

    /// The version the state blob carries (0 if it has none).
    pub fn version(&self) -> u64 {
        snapshot_version(&self.state)
    }
}

/// Keyed storage for room snapshots.
///
/// Implementations must be shareable across tasks; the relay keeps one
/// behind an `Arc` and writes from spawned tasks.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Verifies the backend is reachable and writable.
    fn check(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the snapshot stored for `room`, if any.
    fn read(
        &self,
        room: &RoomCode,
    ) -> impl Future<Output = Result<Option<StoredSnapshot>, StoreError>> + Send;

    /// Replaces the snapshot for `room` and returns the written record.
    fn write(
        &self,
        room: &RoomCode,
        state: Value,
    ) -> impl Future<Output = Result<StoredSnapshot, StoreError>> + Send;
}
