//! One reconciler wired to one transport.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tavern_protocol::RoomCode;
use tavern_transport::Connector;
use tokio::sync::watch;
use tracing::debug;

use crate::{
    ClientError, OpenOutcome, Reaction, Reconciler, ReconnectingTransport, RoomBinding,
    RoomRecord, Subscription, TransportConfig,
};

/// A room client: sends local edits out and folds remote snapshots in.
///
/// Inbound envelopes are reconciled synchronously on the transport's task,
/// under one lock, so comparing versions and adopting a snapshot is a
/// single step. Snapshot requests from peers are answered automatically.
///
/// The version of the bound room is published on a watch channel; see
/// [`updates`](Self::updates).
pub struct SyncClient {
    transport: ReconnectingTransport,
    state: Arc<Mutex<Reconciler>>,
    version: Arc<watch::Sender<u64>>,
    _subscription: Subscription,
}

impl SyncClient {
    /// Dials the relay for `room` with an empty reconciler.
    pub fn connect<C: Connector>(connector: C, room: RoomCode, config: TransportConfig) -> Self {
        Self::attach(
            ReconnectingTransport::connect(connector, room, config),
            Reconciler::new(),
        )
    }

    /// Wires `reconciler` to an existing transport.
    pub fn attach(transport: ReconnectingTransport, reconciler: Reconciler) -> Self {
        let initial = reconciler.bound_record().map_or(0, |r| r.version);
        let state = Arc::new(Mutex::new(reconciler));
        let version = Arc::new(watch::channel(initial).0);

        let subscription = {
            let state = Arc::clone(&state);
            let version = Arc::clone(&version);
            let weak = transport.downgrade();
            let room = transport.room().clone();

            transport.subscribe(move |envelope| {
                let (reaction, bound) = {
                    let mut reconciler = state.lock();
                    let reaction = reconciler.handle(envelope, &room);
                    (reaction, reconciler.bound_record().map(|r| r.version))
                };

                match reaction {
                    Reaction::Adopted { room, version: v, adoption } => {
                        debug!(%room, version = v, ?adoption, "snapshot adopted");
                        if let Some(bound) = bound {
                            publish(&version, bound);
                        }
                    }
                    Reaction::Reply(reply) => {
                        if let Some(transport) = weak.upgrade() {
                            let _ = transport.send(reply);
                        }
                    }
                    Reaction::Ignored => {}
                }
            })
        };

        Self {
            transport,
            state,
            version,
            _subscription: subscription,
        }
    }

    /// The room this client syncs.
    pub fn room(&self) -> &RoomCode {
        self.transport.room()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &ReconnectingTransport {
        &self.transport
    }

    /// Starts the room with `payload` as version 1 and announces it.
    ///
    /// # Errors
    /// [`ClientError::NotAnObject`] if `payload` is not a JSON object,
    /// [`ClientError::Closed`] if the transport was closed.
    pub fn create(&self, payload: Value) -> Result<(), ClientError> {
        let envelope = self.state.lock().create(self.room().clone(), payload)?;
        publish(&self.version, 1);
        self.transport.send(envelope)
    }

    /// Opens the room. Returns `true` if its state was already held;
    /// otherwise a snapshot request is sent and the client waits for it.
    ///
    /// # Errors
    /// [`ClientError::Closed`] if the transport was closed.
    pub fn open(&self) -> Result<bool, ClientError> {
        let outcome = self.state.lock().open(self.room().clone());
        match outcome {
            OpenOutcome::Local => {
                if let Some(v) = self.current().map(|r| r.version) {
                    publish(&self.version, v);
                }
                Ok(true)
            }
            OpenOutcome::Pending(request) => {
                self.transport.send(request)?;
                Ok(false)
            }
        }
    }

    /// Applies `edit` to the room's state, bumps the version, and sends
    /// the new snapshot. Returns the new version.
    ///
    /// # Errors
    /// [`ClientError::NoRoom`] or [`ClientError::NotReady`] if the room is
    /// not open and loaded, [`ClientError::NotAnObject`] if the edit leaves
    /// a non-object, [`ClientError::Closed`] if the transport was closed.
    pub fn mutate<F>(&self, edit: F) -> Result<u64, ClientError>
    where
        F: FnOnce(&mut Value),
    {
        let (envelope, version) = {
            let mut reconciler = self.state.lock();
            let envelope = reconciler.mutate(edit)?;
            let version = reconciler.bound_record().map_or(0, |r| r.version);
            (envelope, version)
        };
        publish(&self.version, version);
        self.transport.send(envelope)?;
        Ok(version)
    }

    /// The bound room's record, once loaded.
    pub fn current(&self) -> Option<RoomRecord> {
        self.state.lock().bound_record().cloned()
    }

    /// The current binding.
    pub fn binding(&self) -> RoomBinding {
        self.state.lock().binding().clone()
    }

    /// The bound room's version (0 until loaded).
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// A receiver that wakes whenever the bound room's version changes.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Closes the transport. The client sends and receives nothing more.
    pub fn close(&self) {
        self.transport.close();
    }
}

fn publish(version: &watch::Sender<u64>, next: u64) {
    version.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}
