//! The relay actor: room membership, fan-out, and snapshot persistence.
//!
//! One relay task runs per server. Connection handlers talk to it only
//! through [`RelayHandle`], over a FIFO channel, and it handles each
//! command to completion before taking the next. The room registry and the
//! outbox of every connection live inside the task, so membership is never
//! raced.
//!
//! Persistence is the one thing that leaves the task. Each room gets a
//! writer task that applies its snapshots to the store one at a time, in
//! the order the relay accepted them, so a slow or failing store never
//! holds up delivery to peers and never reorders a room's writes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tavern_protocol::{Codec, Envelope, JsonCodec, RoomCode, kind};
use tavern_room::{Frame, Outbox, RoomRegistry};
use tavern_store::SnapshotStore;
use tavern_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::TavernError;

/// Commands a connection handler sends to the relay.
///
/// Room-scoped commands carry the room already resolved by the sender's
/// session.
#[derive(Debug)]
pub enum RelayCommand {
    /// A connection was accepted; frames for it go to `outbox`.
    Attach { id: ConnectionId, outbox: Outbox },

    /// Bind `id` to `room` and send it the room's stored snapshot.
    Join { id: ConnectionId, room: RoomCode },

    /// Unbind `id` from its room.
    Leave { id: ConnectionId },

    /// Relay `payload` to the room as `inner_kind`; persist it if it is a
    /// full snapshot.
    Broadcast {
        id: ConnectionId,
        room: RoomCode,
        inner_kind: String,
        payload: Option<Value>,
    },

    /// Persist `payload` and relay it as a snapshot.
    Save {
        id: ConnectionId,
        room: RoomCode,
        payload: Value,
    },

    /// Send `id` the stored snapshot and ask its peers for theirs.
    RequestSnapshot { id: ConnectionId, room: RoomCode },

    /// Relay an incremental change. Never persisted.
    Patch {
        id: ConnectionId,
        room: RoomCode,
        payload: Option<Value>,
    },

    /// The connection is gone; forget it.
    Detach { id: ConnectionId },
}

/// The two effects of one mutation.
#[derive(Debug)]
pub struct Mutation {
    /// Peers the relayed frame was handed to.
    pub delivered: usize,
    /// Resolves once the store write has been attempted, if the mutation
    /// carried a full snapshot. Awaiting it is optional; the relay never
    /// does.
    pub persisted: Option<oneshot::Receiver<()>>,
}

/// One snapshot waiting for its room's writer.
struct PendingWrite {
    state: Value,
    done: oneshot::Sender<()>,
}

/// The writer task of one room.
///
/// `queue` is dropped when the room empties; the task then drains what it
/// has and exits. A writer started later for the same room waits for it.
struct RoomWriter {
    queue: Option<mpsc::UnboundedSender<PendingWrite>>,
    task: JoinHandle<()>,
}

/// Relay state. Driven by [`spawn_relay`] in a server, or directly in
/// tests.
pub struct Relay<S> {
    registry: RoomRegistry,
    outboxes: HashMap<ConnectionId, Outbox>,
    writers: HashMap<RoomCode, RoomWriter>,
    store: Arc<S>,
    codec: JsonCodec,
}

impl<S: SnapshotStore> Relay<S> {
    /// Creates a relay with no connections.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            registry: RoomRegistry::new(),
            outboxes: HashMap::new(),
            writers: HashMap::new(),
            store,
            codec: JsonCodec,
        }
    }

    /// The room registry.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    /// Handles one command to completion.
    pub async fn handle(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Attach { id, outbox } => {
                trace!(conn_id = %id, "attached");
                self.outboxes.insert(id, outbox);
            }
            RelayCommand::Join { id, room } => self.join(id, room).await,
            RelayCommand::Leave { id } => {
                if let Some(room) = self.registry.leave(id) {
                    self.close_if_empty(&room);
                }
            }
            RelayCommand::Broadcast {
                id,
                room,
                inner_kind,
                payload,
            } => {
                let persist = if kind::is_snapshot(&inner_kind) {
                    payload.clone()
                } else {
                    None
                };
                let relayed = Envelope {
                    room: Some(room.clone()),
                    payload,
                    ..Envelope::new(inner_kind)
                };
                self.apply_mutation(id, &room, &relayed, persist);
            }
            RelayCommand::Save { id, room, payload } => {
                let relayed = Envelope::snapshot(room.clone(), Some(payload.clone()));
                self.apply_mutation(id, &room, &relayed, Some(payload));
            }
            RelayCommand::RequestSnapshot { id, room } => {
                self.request_snapshot(id, room).await;
            }
            RelayCommand::Patch { id, room, payload } => {
                let relayed = Envelope {
                    room: Some(room.clone()),
                    payload,
                    ..Envelope::new(kind::PATCH)
                };
                self.apply_mutation(id, &room, &relayed, None);
            }
            RelayCommand::Detach { id } => {
                if let Some(room) = self.registry.leave(id) {
                    self.close_if_empty(&room);
                }
                self.outboxes.remove(&id);
                trace!(conn_id = %id, "detached");
            }
        }
    }

    /// Binds `id` to `room` and unicasts the stored snapshot (or `null`).
    async fn join(&mut self, id: ConnectionId, room: RoomCode) {
        let Some(outbox) = self.outboxes.get(&id).cloned() else {
            warn!(conn_id = %id, %room, "join from unattached connection");
            return;
        };

        let outcome = self.registry.join(id, outbox, room.clone());
        if outcome.created {
            info!(%room, "room opened");
        }
        if let Some(previous) = &outcome.previous {
            self.close_if_empty(previous);
        }

        let state = self.read_snapshot(&room).await;
        debug!(conn_id = %id, %room, found = state.is_some(), "sending stored snapshot");
        self.unicast(id, &Envelope::snapshot(room, state));
    }

    /// Unicasts the stored snapshot to `id` and relays the request to the
    /// rest of the room, so a peer holding newer state can answer.
    async fn request_snapshot(&mut self, id: ConnectionId, room: RoomCode) {
        let state = self.read_snapshot(&room).await;
        self.unicast(id, &Envelope::snapshot(room.clone(), state));

        let request = Envelope {
            room: Some(room.clone()),
            ..Envelope::new(kind::REQUEST_SNAPSHOT)
        };
        self.fan_out(&room, &request, Some(id));
    }

    /// Applies one mutation from `sender`: fan-out to the other members of
    /// `room`, then, if `snapshot` is given, a store write queued on the
    /// room's writer.
    ///
    /// The two steps are independent. Fan-out completes before this
    /// returns; the write may still be running, and its failure is only
    /// logged.
    pub fn apply_mutation(
        &mut self,
        sender: ConnectionId,
        room: &RoomCode,
        relayed: &Envelope,
        snapshot: Option<Value>,
    ) -> Mutation {
        let delivered = self.fan_out(room, relayed, Some(sender));
        let persisted = snapshot
            .filter(|state| !state.is_null())
            .map(|state| self.persist(room.clone(), state));

        trace!(
            conn_id = %sender,
            %room,
            kind = %relayed.kind,
            delivered,
            persisted = persisted.is_some(),
            "mutation applied"
        );
        Mutation {
            delivered,
            persisted,
        }
    }

    /// Encodes once and hands the frame to every member but `exclude`.
    fn fan_out(&self, room: &RoomCode, envelope: &Envelope, exclude: Option<ConnectionId>) -> usize {
        match self.encode(envelope) {
            Some(frame) => self.registry.broadcast(room, &frame, exclude),
            None => 0,
        }
    }

    fn unicast(&self, id: ConnectionId, envelope: &Envelope) -> bool {
        let (Some(outbox), Some(frame)) = (self.outboxes.get(&id), self.encode(envelope)) else {
            return false;
        };
        outbox.send(frame).is_ok()
    }

    /// Queues `state` on the room's writer, starting one if needed.
    fn persist(&mut self, room: RoomCode, state: Value) -> oneshot::Receiver<()> {
        let (done, persisted) = oneshot::channel();
        let mut write = PendingWrite { state, done };

        if let Some(queue) = self.writers.get(&room).and_then(|w| w.queue.as_ref()) {
            match queue.send(write) {
                Ok(()) => return persisted,
                Err(mpsc::error::SendError(unsent)) => write = unsent,
            }
        }

        let previous = self.writers.remove(&room).map(|w| w.task);
        let (queue, pending) = mpsc::unbounded_channel();
        let _ = queue.send(write);
        let task = tokio::spawn(run_writer(
            Arc::clone(&self.store),
            room.clone(),
            previous,
            pending,
        ));
        self.writers.insert(
            room,
            RoomWriter {
                queue: Some(queue),
                task,
            },
        );
        persisted
    }

    /// Reads the stored snapshot. A failed read counts as no snapshot.
    async fn read_snapshot(&self, room: &RoomCode) -> Option<Value> {
        match self.store.read(room).await {
            Ok(record) => record.map(|r| r.state),
            Err(e) => {
                warn!(%room, error = %e, "snapshot read failed");
                None
            }
        }
    }

    fn encode(&self, envelope: &Envelope) -> Option<Frame> {
        match self.codec.encode(envelope) {
            Ok(bytes) => Some(Arc::new(bytes)),
            Err(e) => {
                warn!(kind = %envelope.kind, error = %e, "failed to encode frame");
                None
            }
        }
    }

    /// If `room` has no members left, logs it and retires its writer.
    fn close_if_empty(&mut self, room: &RoomCode) {
        if self.registry.contains_room(room) {
            return;
        }
        info!(%room, "room closed");
        if let Some(writer) = self.writers.get_mut(room) {
            writer.queue = None;
        }
        self.writers
            .retain(|_, w| w.queue.is_some() || !w.task.is_finished());
    }
}

/// Applies a room's snapshots in order. Starts after `previous`, the
/// room's retired writer, has finished.
async fn run_writer<S: SnapshotStore>(
    store: Arc<S>,
    room: RoomCode,
    previous: Option<JoinHandle<()>>,
    mut pending: mpsc::UnboundedReceiver<PendingWrite>,
) {
    if let Some(previous) = previous {
        let _ = previous.await;
    }
    while let Some(PendingWrite { state, done }) = pending.recv().await {
        match store.write(&room, state).await {
            Ok(record) => {
                debug!(%room, version = record.version(), "snapshot persisted");
            }
            Err(e) => warn!(%room, error = %e, "snapshot write failed"),
        }
        let _ = done.send(());
    }
    trace!(%room, "room writer stopped");
}

// ---------------------------------------------------------------------------
// Relay task
// ---------------------------------------------------------------------------

/// Handle to a running relay task. Cheap to clone.
#[derive(Clone)]
pub struct RelayHandle {
    commands: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    /// Queues `command` for the relay.
    ///
    /// # Errors
    /// [`TavernError::RelayStopped`] if the relay task has exited.
    pub fn send(&self, command: RelayCommand) -> Result<(), TavernError> {
        self.commands
            .send(command)
            .map_err(|_| TavernError::RelayStopped)
    }
}

/// Spawns the relay task over `store` and returns its handle.
///
/// The task stops once every handle has been dropped.
pub fn spawn_relay<S: SnapshotStore>(store: Arc<S>) -> RelayHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut relay = Relay::new(store);

    tokio::spawn(async move {
        debug!("relay task started");
        while let Some(command) = rx.recv().await {
            relay.handle(command).await;
        }
        debug!("relay task stopped");
    });

    RelayHandle { commands: tx }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tavern_store::{MemorySnapshotStore, StoreError, StoredSnapshot};

    use super::*;

    /// A store whose every operation fails.
    struct BrokenStore;

    impl SnapshotStore for BrokenStore {
        async fn check(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("broken".into()))
        }

        async fn read(&self, _room: &RoomCode) -> Result<Option<StoredSnapshot>, StoreError> {
            Err(StoreError::Unavailable("broken".into()))
        }

        async fn write(&self, _room: &RoomCode, _state: Value) -> Result<StoredSnapshot, StoreError> {
            Err(StoreError::Unavailable("broken".into()))
        }
    }

    /// A memory store that stalls every write of version 2.
    #[derive(Default)]
    struct SlowV2Store {
        inner: MemorySnapshotStore,
    }

    impl SnapshotStore for SlowV2Store {
        async fn check(&self) -> Result<(), StoreError> {
            self.inner.check().await
        }

        async fn read(&self, room: &RoomCode) -> Result<Option<StoredSnapshot>, StoreError> {
            self.inner.read(room).await
        }

        async fn write(&self, room: &RoomCode, state: Value) -> Result<StoredSnapshot, StoreError> {
            if tavern_protocol::snapshot_version(&state) == 2 {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            self.inner.write(room, state).await
        }
    }

    fn room(code: &str) -> RoomCode {
        RoomCode::parse(code).unwrap()
    }

    async fn attach_and_join<S: SnapshotStore>(
        relay: &mut Relay<S>,
        n: u64,
        code: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let id = ConnectionId::new(n);
        let (outbox, mut inbox) = mpsc::unbounded_channel();
        relay.handle(RelayCommand::Attach { id, outbox }).await;
        relay.handle(RelayCommand::Join { id, room: room(code) }).await;
        // Swallow the join reply.
        inbox.try_recv().expect("join reply");
        (id, inbox)
    }

    fn decode(frame: Frame) -> Envelope {
        JsonCodec.decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_join_unicasts_null_when_nothing_stored() {
        let mut relay = Relay::new(Arc::new(MemorySnapshotStore::new()));
        let id = ConnectionId::new(1);
        let (outbox, mut inbox) = mpsc::unbounded_channel();
        relay.handle(RelayCommand::Attach { id, outbox }).await;
        relay.handle(RelayCommand::Join { id, room: room("A") }).await;

        let reply = decode(inbox.try_recv().unwrap());
        assert_eq!(reply, Envelope::snapshot(room("A"), None));
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_fan_out() {
        let mut relay = Relay::new(Arc::new(BrokenStore));
        let (a, _a_inbox) = attach_and_join(&mut relay, 1, "A").await;
        let (_b, mut b_inbox) = attach_and_join(&mut relay, 2, "A").await;

        let relayed = Envelope::snapshot(room("A"), Some(json!({"version": 2})));
        let mutation = relay.apply_mutation(a, &room("A"), &relayed, Some(json!({"version": 2})));

        assert_eq!(mutation.delivered, 1);
        assert_eq!(decode(b_inbox.try_recv().unwrap()), relayed);
        mutation
            .persisted
            .expect("a write was attempted")
            .await
            .expect("failed write is logged, not panicked");
    }

    #[tokio::test]
    async fn test_snapshots_from_one_sender_persist_in_order() {
        let store = Arc::new(SlowV2Store::default());
        let mut relay = Relay::new(Arc::clone(&store));
        let (a, _a_inbox) = attach_and_join(&mut relay, 1, "A").await;

        for version in [2, 3] {
            relay
                .handle(RelayCommand::Save {
                    id: a,
                    room: room("A"),
                    payload: json!({"version": version}),
                })
                .await;
        }
        let last = relay.apply_mutation(
            a,
            &room("A"),
            &Envelope::snapshot(room("A"), Some(json!({"version": 4}))),
            Some(json!({"version": 4})),
        );
        last.persisted.unwrap().await.unwrap();

        let stored = store.read(&room("A")).await.unwrap().unwrap();
        assert_eq!(stored.version(), 4);
    }

    #[tokio::test]
    async fn test_write_after_room_reopens_waits_for_earlier_writes() {
        let store = Arc::new(SlowV2Store::default());
        let mut relay = Relay::new(Arc::clone(&store));
        let (a, _a_inbox) = attach_and_join(&mut relay, 1, "A").await;

        let slow = relay.apply_mutation(
            a,
            &room("A"),
            &Envelope::snapshot(room("A"), Some(json!({"version": 2}))),
            Some(json!({"version": 2})),
        );
        relay.handle(RelayCommand::Leave { id: a }).await;
        assert!(!relay.registry().contains_room(&room("A")));

        let (b, _b_inbox) = attach_and_join(&mut relay, 2, "A").await;
        let fast = relay.apply_mutation(
            b,
            &room("A"),
            &Envelope::snapshot(room("A"), Some(json!({"version": 3}))),
            Some(json!({"version": 3})),
        );
        fast.persisted.unwrap().await.unwrap();
        slow.persisted.unwrap().await.unwrap();

        let stored = store.read(&room("A")).await.unwrap().unwrap();
        assert_eq!(stored.version(), 3);
    }

    #[tokio::test]
    async fn test_closed_peer_does_not_block_persistence() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut relay = Relay::new(Arc::clone(&store));
        let (a, _a_inbox) = attach_and_join(&mut relay, 1, "A").await;
        let (_b, b_inbox) = attach_and_join(&mut relay, 2, "A").await;
        drop(b_inbox);

        let relayed = Envelope::snapshot(room("A"), Some(json!({"version": 3})));
        let mutation = relay.apply_mutation(a, &room("A"), &relayed, Some(json!({"version": 3})));

        assert_eq!(mutation.delivered, 0);
        mutation.persisted.unwrap().await.unwrap();
        let stored = store.read(&room("A")).await.unwrap().unwrap();
        assert_eq!(stored.version(), 3);
    }

    #[tokio::test]
    async fn test_join_with_failing_read_sends_null() {
        let mut relay = Relay::new(Arc::new(BrokenStore));
        let id = ConnectionId::new(1);
        let (outbox, mut inbox) = mpsc::unbounded_channel();
        relay.handle(RelayCommand::Attach { id, outbox }).await;
        relay.handle(RelayCommand::Join { id, room: room("A") }).await;

        let reply = decode(inbox.try_recv().unwrap());
        assert_eq!(reply.payload, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_patch_is_relayed_but_not_persisted() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut relay = Relay::new(Arc::clone(&store));
        let (a, _) = attach_and_join(&mut relay, 1, "A").await;
        let (_b, mut b_inbox) = attach_and_join(&mut relay, 2, "A").await;

        relay
            .handle(RelayCommand::Patch {
                id: a,
                room: room("A"),
                payload: Some(json!({"op": "hp", "value": 7})),
            })
            .await;

        let got = decode(b_inbox.try_recv().unwrap());
        assert_eq!(got.kind, "patch");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_non_snapshot_inner_kind_is_not_persisted() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut relay = Relay::new(Arc::clone(&store));
        let (a, _) = attach_and_join(&mut relay, 1, "A").await;
        let (_b, mut b_inbox) = attach_and_join(&mut relay, 2, "A").await;

        relay
            .handle(RelayCommand::Broadcast {
                id: a,
                room: room("A"),
                inner_kind: "dice".into(),
                payload: Some(json!({"d20": 17})),
            })
            .await;

        let got = decode(b_inbox.try_recv().unwrap());
        assert_eq!(got.kind, "dice");
        assert_eq!(got.inner_kind, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_request_snapshot_answers_requester_and_asks_peers() {
        let store = Arc::new(MemorySnapshotStore::new());
        store.write(&room("A"), json!({"version": 4})).await.unwrap();
        let mut relay = Relay::new(Arc::clone(&store));
        let (_dm, mut dm_inbox) = attach_and_join(&mut relay, 1, "A").await;
        let (player, mut player_inbox) = attach_and_join(&mut relay, 2, "A").await;

        relay
            .handle(RelayCommand::RequestSnapshot {
                id: player,
                room: room("A"),
            })
            .await;

        let answer = decode(player_inbox.try_recv().unwrap());
        assert_eq!(answer.payload, Some(json!({"version": 4})));
        let asked = decode(dm_inbox.try_recv().unwrap());
        assert_eq!(asked.kind, "request_snapshot");
        assert!(player_inbox.try_recv().is_err(), "requester is not asked");
    }

    #[tokio::test]
    async fn test_detach_removes_membership() {
        let mut relay = Relay::new(Arc::new(MemorySnapshotStore::new()));
        let (a, _) = attach_and_join(&mut relay, 1, "A").await;

        relay.handle(RelayCommand::Detach { id: a }).await;

        assert!(!relay.registry().contains_room(&room("A")));
        assert_eq!(relay.connection_count(), 0);
    }
}
