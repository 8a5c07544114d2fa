//! `TavernServer` builder and accept loop.
//!
//! This is the entry point for running a relay. It ties the layers
//! together: transport → handler (protocol, session) → relay (rooms,
//! store).

use std::net::SocketAddr;
use std::sync::Arc;

use tavern_store::SnapshotStore;
use tavern_transport::{Transport, WebSocketTransport};

use crate::TavernError;
use crate::handler::handle_connection;
use crate::relay::{RelayHandle, spawn_relay};

/// Builder for configuring and starting a relay.
///
/// # Example
///
/// ```rust,no_run
/// use tavern::prelude::*;
///
/// # async fn demo() -> Result<(), TavernError> {
/// let server = TavernServer::builder()
///     .bind("0.0.0.0:10000")
///     .build(MemorySnapshotStore::new())
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct TavernServerBuilder {
    bind_addr: String,
}

impl TavernServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:10000".to_string(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Checks the store, binds the listener, and starts the relay task.
    ///
    /// # Errors
    /// [`TavernError::Store`] if the store is unreachable or not writable,
    /// [`TavernError::Transport`] if the address cannot be bound.
    pub async fn build<S: SnapshotStore>(self, store: S) -> Result<TavernServer, TavernError> {
        store.check().await?;
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let relay = spawn_relay(Arc::new(store));
        Ok(TavernServer { transport, relay })
    }
}

impl Default for TavernServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A relay ready to accept connections.
///
/// Call [`run()`](Self::run) to start accepting.
pub struct TavernServer {
    transport: WebSocketTransport,
    relay: RelayHandle,
}

impl TavernServer {
    /// Creates a new builder.
    pub fn builder() -> TavernServerBuilder {
        TavernServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the accept loop, one handler task per connection. Runs until
    /// the process is terminated; a failed accept is logged and skipped.
    pub async fn run(mut self) -> Result<(), TavernError> {
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%addr, "tavern relay running");
        }

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let relay = self.relay.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, relay).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}
