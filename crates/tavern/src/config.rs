//! Relay configuration, from flags or environment.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tavern_store::{FileSnapshotStore, MemorySnapshotStore, StoreBackend, StoreError};

use crate::TavernError;

/// Which snapshot store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// One JSON file per room under `--data-dir`.
    File,
    /// In process memory; lost on exit.
    Memory,
    /// Redis at `--redis-url`.
    Redis,
}

/// Command-line and environment configuration for `tavern-relay`.
#[derive(Debug, Clone, Parser)]
#[command(name = "tavern-relay", version, about = "Real-time room sync relay")]
pub struct RelayConfig {
    /// Address to listen on
    #[arg(long, env = "TAVERN_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 10000)]
    pub port: u16,

    /// Snapshot store backend
    #[arg(long, env = "TAVERN_STORE", value_enum, default_value_t = StoreKind::File)]
    pub store: StoreKind,

    /// Directory for the file store
    #[arg(long, env = "TAVERN_DATA_DIR", default_value = "data/rooms")]
    pub data_dir: PathBuf,

    /// Redis connection URL (required with `--store redis`)
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Key prefix for the Redis store
    #[arg(long, env = "TAVERN_REDIS_PREFIX", default_value = "dndhub:rooms")]
    pub redis_prefix: String,
}

impl RelayConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Opens the configured store. Reachability is checked later, when
    /// the server is built.
    ///
    /// # Errors
    /// [`TavernError::Store`] if the backend cannot be opened, including
    /// `redis` without a URL or in a build without Redis support.
    pub async fn open_store(&self) -> Result<StoreBackend, TavernError> {
        match self.store {
            StoreKind::File => Ok(FileSnapshotStore::new(&self.data_dir).into()),
            StoreKind::Memory => Ok(MemorySnapshotStore::new().into()),
            StoreKind::Redis => self.open_redis().await,
        }
    }

    #[cfg(feature = "redis")]
    async fn open_redis(&self) -> Result<StoreBackend, TavernError> {
        let url = self
            .redis_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("--store redis needs REDIS_URL".into()))?;
        let store = tavern_store::RedisSnapshotStore::connect(url, self.redis_prefix.clone()).await?;
        Ok(store.into())
    }

    #[cfg(not(feature = "redis"))]
    async fn open_redis(&self) -> Result<StoreBackend, TavernError> {
        Err(StoreError::Unavailable("built without redis support".into()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RelayConfig {
        let mut argv = vec!["tavern-relay"];
        argv.extend_from_slice(args);
        RelayConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&["--bind", "127.0.0.1", "--port", "4000", "--store", "memory"]);
        assert_eq!(config.bind_addr(), "127.0.0.1:4000");
        assert_eq!(config.store, StoreKind::Memory);
    }

    #[test]
    fn test_unknown_store_kind_is_rejected() {
        let result = RelayConfig::try_parse_from(["tavern-relay", "--store", "mongo"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_store_redis_without_url_fails() {
        let mut config = parse(&["--store", "redis"]);
        config.redis_url = None;
        let result = config.open_store().await;
        assert!(matches!(result, Err(TavernError::Store(StoreError::Unavailable(_)))));
    }

    #[tokio::test]
    async fn test_open_store_file_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = parse(&["--store", "file", "--data-dir", dir.path().to_str().unwrap()]);
        let store = config.open_store().await.unwrap();
        assert_eq!(store.name(), "file");
    }
}
