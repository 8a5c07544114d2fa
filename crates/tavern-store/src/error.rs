//! Error types for snapshot storage.

/// Errors that can occur while reading or writing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized, or a stored record is corrupt.
    #[error("snapshot record is malformed: {0}")]
    Serde(#[from] serde_json::Error),

    /// The Redis backend returned an error.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backend cannot be used (bad configuration, not writable).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
