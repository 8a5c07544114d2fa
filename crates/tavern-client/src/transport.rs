//! Reconnecting room transport.
//!
//! One background task owns the link to the relay. It dials through a
//! [`Connector`], announces the room, replays whatever was queued while
//! offline, and then pumps frames both ways until the link drops. After a
//! drop it waits a fixed delay and dials again, for as long as the
//! transport is not closed.
//!
//! ```text
//!   Connecting ──ok──→ Connected ──drop──→ Disconnected ──delay──→ Connecting
//!        └────────────fail──────────────────────↗
//!   close() from anywhere ──→ Closed
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tavern_protocol::{Codec, Envelope, JsonCodec, RoomCode};
use tavern_transport::{Connection, Connector};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::ClientError;

/// Delay between a lost link and the next connection attempt.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Settings for a [`ReconnectingTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long to wait after a failed attempt or a dropped link. Fixed;
    /// there is no backoff and no attempt limit.
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Link state as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// A connection attempt is in flight.
    Connecting,
    /// The link is up and the join has been written.
    Connected,
    /// The link is down; a retry is scheduled.
    Disconnected,
    /// [`ReconnectingTransport::close`] was called. Terminal.
    Closed,
}

/// Callback invoked for every decoded inbound envelope.
pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Where outgoing envelopes go.
///
/// While offline they pile up in `queue`. While online they are handed to
/// the connection task through `live`. Both are only touched under the
/// lock, which is what keeps the replay order intact across reconnects.
#[derive(Default)]
struct Outbound {
    queue: VecDeque<Envelope>,
    live: Option<mpsc::UnboundedSender<Envelope>>,
    closed: bool,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

struct Shared {
    room: RoomCode,
    codec: JsonCodec,
    outbound: Mutex<Outbound>,
    listeners: Mutex<Listeners>,
    status: watch::Sender<LinkStatus>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn set_status(&self, next: LinkStatus) {
        self.status.send_if_modified(|current| {
            if *current == LinkStatus::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Switches sends to the live connection and returns the backlog to
    /// write first.
    fn go_online(&self, live: mpsc::UnboundedSender<Envelope>) -> VecDeque<Envelope> {
        let mut out = self.outbound.lock();
        out.live = Some(live);
        std::mem::take(&mut out.queue)
    }

    /// Switches sends back to the queue. `unsent` (envelopes the task had
    /// taken but not written) goes first, then whatever was still waiting
    /// in the live channel.
    fn go_offline(&self, mut unsent: VecDeque<Envelope>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        let mut out = self.outbound.lock();
        out.live = None;
        if out.closed {
            return;
        }
        while let Ok(env) = rx.try_recv() {
            unsent.push_back(env);
        }
        unsent.extend(out.queue.drain(..));
        out.queue = unsent;
        if !out.queue.is_empty() {
            debug!(room = %self.room, queued = out.queue.len(), "link lost, envelopes requeued");
        }
    }

    /// Decodes one inbound frame and hands it to every listener.
    fn dispatch(&self, bytes: &[u8]) {
        let envelope: Envelope = match self.codec.decode(bytes) {
            Ok(env) => env,
            Err(e) => {
                trace!(room = %self.room, error = %e, "dropping undecodable frame");
                return;
            }
        };

        // Call outside the lock so listeners may subscribe or send.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&envelope);
        }
    }

    fn encode(&self, env: &Envelope) -> Option<Vec<u8>> {
        match self.codec.encode(env) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(room = %self.room, kind = %env.kind, error = %e, "dropping unencodable envelope");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectingTransport
// ---------------------------------------------------------------------------

/// A room-scoped link to the relay that survives disconnects.
///
/// Cheap to clone; clones share one connection task. The task keeps
/// running until [`close`](Self::close) is called, even if every handle
/// has been dropped.
#[derive(Clone)]
pub struct ReconnectingTransport {
    shared: Arc<Shared>,
}

impl ReconnectingTransport {
    /// Spawns the connection task for `room` and starts the first attempt
    /// right away. Must be called from within a Tokio runtime.
    pub fn connect<C: Connector>(connector: C, room: RoomCode, config: TransportConfig) -> Self {
        let (status, _) = watch::channel(LinkStatus::Connecting);
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            room,
            codec: JsonCodec,
            outbound: Mutex::new(Outbound::default()),
            listeners: Mutex::new(Listeners::default()),
            status,
            closed,
        });

        tokio::spawn(run_link(Arc::clone(&shared), connector, config));
        Self { shared }
    }

    /// The room this transport joins on every connect.
    pub fn room(&self) -> &RoomCode {
        &self.shared.room
    }

    /// Sends `envelope` now if the link is up, otherwise queues it for the
    /// next connect.
    ///
    /// # Errors
    /// [`ClientError::Closed`] after [`close`](Self::close).
    pub fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        let mut out = self.shared.outbound.lock();
        if out.closed {
            return Err(ClientError::Closed);
        }
        let returned = match &out.live {
            Some(live) => match live.send(envelope) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(env)) => env,
            },
            None => envelope,
        };
        out.queue.push_back(returned);
        Ok(())
    }

    /// Registers `listener` for every decoded inbound envelope.
    ///
    /// The listener stays registered until the returned [`Subscription`]
    /// is disposed or dropped, or the transport is closed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let mut listeners = self.shared.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, listener));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Stops reconnecting, closes the live link and drops all listeners.
    /// Calling it again does nothing.
    pub fn close(&self) {
        {
            let mut out = self.shared.outbound.lock();
            if out.closed {
                return;
            }
            out.closed = true;
            out.live = None;
            out.queue.clear();
        }
        self.shared.listeners.lock().entries.clear();
        self.shared.status.send_replace(LinkStatus::Closed);
        self.shared.closed.send_replace(true);
        debug!(room = %self.shared.room, "transport closed");
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Current link state.
    pub fn status(&self) -> LinkStatus {
        *self.shared.status.borrow()
    }

    /// A receiver that observes every link state change.
    pub fn status_changes(&self) -> watch::Receiver<LinkStatus> {
        self.shared.status.subscribe()
    }

    /// Number of envelopes waiting for the next connect.
    pub fn queued(&self) -> usize {
        self.shared.outbound.lock().queue.len()
    }

    /// A handle that does not keep the transport alive.
    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

/// A non-owning [`ReconnectingTransport`] handle, for listeners that need
/// to send through the transport that calls them.
#[derive(Clone)]
pub struct WeakTransport {
    shared: Weak<Shared>,
}

impl WeakTransport {
    /// The transport, if it still exists.
    pub fn upgrade(&self) -> Option<ReconnectingTransport> {
        self.shared
            .upgrade()
            .map(|shared| ReconnectingTransport { shared })
    }
}

/// Keeps a listener registered. Dispose or drop it to unregister.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Subscription {
    /// Unregisters the listener.
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn run_link<C: Connector>(shared: Arc<Shared>, connector: C, config: TransportConfig) {
    let mut closed = shared.closed.subscribe();
    let room = shared.room.clone();
    debug!(%room, "link task started");

    loop {
        shared.set_status(LinkStatus::Connecting);
        let attempt = tokio::select! {
            res = connector.connect() => res,
            _ = wait_closed(&mut closed) => break,
        };

        match attempt {
            Ok(conn) => {
                debug!(%room, conn_id = %conn.id(), "link up");
                serve(&shared, &conn, &mut closed).await;
                let _ = conn.close().await;
                debug!(%room, conn_id = %conn.id(), "link down");
            }
            Err(e) => debug!(%room, error = %e, "connect attempt failed"),
        }

        if *closed.borrow() {
            break;
        }
        shared.set_status(LinkStatus::Disconnected);

        tokio::select! {
            _ = tokio::time::sleep(config.retry_delay) => {}
            _ = wait_closed(&mut closed) => break,
        }
    }

    shared.set_status(LinkStatus::Closed);
    debug!(%room, "link task stopped");
}

/// Drives one live connection until it drops or the transport closes.
async fn serve<K: Connection>(shared: &Shared, conn: &K, closed: &mut watch::Receiver<bool>) {
    // The join goes out before anything queued.
    let Some(join) = shared.encode(&Envelope::join(shared.room.clone())) else {
        return;
    };
    if conn.send(&join).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut backlog = shared.go_online(tx);
    shared.set_status(LinkStatus::Connected);

    while let Some(env) = backlog.pop_front() {
        if *closed.borrow() {
            shared.go_offline(VecDeque::new(), rx);
            return;
        }
        if !write(shared, conn, &env).await {
            backlog.push_front(env);
            shared.go_offline(backlog, rx);
            return;
        }
    }

    loop {
        tokio::select! {
            biased;
            _ = wait_closed(closed) => {
                shared.go_offline(VecDeque::new(), rx);
                return;
            }
            Some(env) = rx.recv() => {
                if !write(shared, conn, &env).await {
                    shared.go_offline(VecDeque::from([env]), rx);
                    return;
                }
            }
            frame = conn.recv() => match frame {
                Ok(Some(bytes)) => shared.dispatch(&bytes),
                Ok(None) => {
                    shared.go_offline(VecDeque::new(), rx);
                    return;
                }
                Err(e) => {
                    debug!(room = %shared.room, error = %e, "receive failed");
                    shared.go_offline(VecDeque::new(), rx);
                    return;
                }
            },
        }
    }
}

/// Writes one envelope. Returns `false` if the link failed; an envelope
/// that cannot be encoded counts as written and is dropped.
async fn write<K: Connection>(shared: &Shared, conn: &K, env: &Envelope) -> bool {
    let Some(bytes) = shared.encode(env) else {
        return true;
    };
    match conn.send(&bytes).await {
        Ok(()) => true,
        Err(e) => {
            debug!(room = %shared.room, error = %e, "write failed");
            false
        }
    }
}
