//! Client side of Tavern room sync.
//!
//! - [`ReconnectingTransport`]: a room-scoped link to the relay that
//!   queues while offline and rejoins on every reconnect.
//! - [`Reconciler`]: decides which snapshot wins, by version.
//! - [`SyncClient`]: the two wired together.
//!
//! ```no_run
//! use tavern_client::{SyncClient, TransportConfig};
//! use tavern_protocol::RoomCode;
//! use tavern_transport::WebSocketConnector;
//!
//! # async fn demo() -> Result<(), tavern_client::ClientError> {
//! let room = RoomCode::generate();
//! let client = SyncClient::connect(
//!     WebSocketConnector::new("ws://localhost:10000"),
//!     room,
//!     TransportConfig::default(),
//! );
//! client.create(serde_json::json!({"name": "Lost Mine"}))?;
//! client.mutate(|state| state["players"] = serde_json::json!(["Mira"]))?;
//! # Ok(())
//! # }
//! ```

mod error;
mod reconciler;
mod sync;
mod transport;

pub use error::ClientError;
pub use reconciler::{Adoption, OpenOutcome, Reaction, Reconciler, RoomBinding, RoomRecord};
pub use sync::SyncClient;
pub use transport::{
    LinkStatus, Listener, ReconnectingTransport, Subscription, TransportConfig, WeakTransport,
};
