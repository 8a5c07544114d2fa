//! Snapshot storage in Redis, one string key per room.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use tavern_protocol::RoomCode;
use tracing::debug;

use crate::{SnapshotStore, StoreError, StoredSnapshot};

/// Stores each room's record as JSON under `<prefix>:<ROOMCODE>`.
///
/// The connection manager reconnects on its own; clones share it.
#[derive(Clone)]
pub struct RedisSnapshotStore {
    redis: ConnectionManager,
    prefix: String,
}

impl RedisSnapshotStore {
    /// Opens a managed connection to `url`.
    ///
    /// # Errors
    /// Returns [`StoreError::Redis`] if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self {
            redis,
            prefix: prefix.into(),
        })
    }
}

/// Key holding the record for `room`.
pub(crate) fn room_key(prefix: &str, room: &RoomCode) -> String {
    format!("{prefix}:{room}")
}

impl SnapshotStore for RedisSnapshotStore {
    async fn check(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn read(&self, room: &RoomCode) -> Result<Option<StoredSnapshot>, StoreError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(room_key(&self.prefix, room)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, room: &RoomCode, state: Value) -> Result<StoredSnapshot, StoreError> {
        let record = StoredSnapshot::new(room.clone(), state);
        let serialized = serde_json::to_string(&record)?;

        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(room_key(&self.prefix, room), serialized)
            .await?;

        debug!(%room, version = record.version(), "snapshot written to redis");
        Ok(record)
    }
}
