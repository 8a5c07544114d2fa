//! # Tavern
//!
//! Real-time room sync for a shared campaign.
//!
//! A DM and their players each hold a copy of the campaign state. Tavern
//! keeps those copies converged: clients join a room by its code, publish
//! versioned snapshots (and patches) to it, and the relay fans every
//! message out to the other members while persisting the latest full
//! snapshot per room. On join, the relay hands back whatever it has
//! stored, and clients adopt a snapshot only if it is newer than their own.
//!
//! The workspace is layered:
//!
//! - `tavern-transport`: WebSocket accept/dial behind small traits
//! - `tavern-protocol`: the JSON envelope and room codes
//! - `tavern-session`: one connection's room binding
//! - `tavern-room`: room membership and fan-out
//! - `tavern-store`: snapshot persistence (memory, file, Redis)
//! - `tavern-client`: reconnecting transport and version reconciliation
//!
//! This crate wires them into a relay server.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tavern::prelude::*;
//!
//! # async fn demo() -> Result<(), TavernError> {
//! let server = TavernServer::builder()
//!     .bind("0.0.0.0:10000")
//!     .build(FileSnapshotStore::new("data/rooms"))
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod relay;
mod server;

pub use config::{RelayConfig, StoreKind};
pub use error::TavernError;
pub use relay::{Mutation, Relay, RelayCommand, RelayHandle, spawn_relay};
pub use server::{TavernServer, TavernServerBuilder};

/// Everything needed to run a relay or a client.
pub mod prelude {
    pub use crate::{RelayConfig, TavernError, TavernServer, TavernServerBuilder};
    pub use tavern_client::{
        ClientError, LinkStatus, ReconnectingTransport, Reconciler, RoomBinding, SyncClient,
        TransportConfig,
    };
    pub use tavern_protocol::{Envelope, RoomCode, kind};
    pub use tavern_store::{
        FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoreBackend, StoredSnapshot,
    };
    pub use tavern_transport::WebSocketConnector;
}
