//! Snapshot storage as one JSON file per room.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde_json::Value;
use tavern_protocol::RoomCode;
use tokio::fs;
use tracing::debug;

use crate::{SnapshotStore, StoreError, StoredSnapshot};

/// Stores each room's record as `<dir>/<ROOMCODE>.json`.
///
/// A write goes to a uniquely named temp file in the same directory and is
/// then renamed over the target, so readers see either the old record or
/// the new one, never a partial file. Concurrent writers to one room
/// resolve by whichever rename happens last.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Creates a store rooted at `dir`. The directory is created on first
    /// use, not here.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record file for `room`.
    pub fn path_for(&self, room: &RoomCode) -> PathBuf {
        self.dir.join(format!("{room}.json"))
    }

    fn temp_path(&self, stem: &str) -> PathBuf {
        self.dir
            .join(format!(".{stem}.{:016x}.tmp", rand::random::<u64>()))
    }
}

impl SnapshotStore for FileSnapshotStore {
    async fn check(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;

        // Prove the directory is writable, not just present.
        let probe = self.temp_path("probe");
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }

    async fn read(&self, room: &RoomCode) -> Result<Option<StoredSnapshot>, StoreError> {
        match fs::read(self.path_for(room)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, room: &RoomCode, state: Value) -> Result<StoredSnapshot, StoreError> {
        let record = StoredSnapshot::new(room.clone(), state);
        let bytes = serde_json::to_vec_pretty(&record)?;

        fs::create_dir_all(&self.dir).await?;
        let tmp = self.temp_path(room.as_str());
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, self.path_for(room)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(%room, version = record.version(), "snapshot written to disk");
        Ok(record)
    }
}
