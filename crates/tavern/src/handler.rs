//! Per-connection handler: decode frames, resolve rooms, feed the relay.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The task owns the connection's [`Session`] and is the only writer on
//! its socket:
//!   1. Attach an outbox to the relay
//!   2. Loop: write outbox frames, read and dispatch inbound frames
//!   3. On exit, detach (via a drop guard)

use tavern_protocol::{Codec, Envelope, JsonCodec, Request};
use tavern_room::Frame;
use tavern_session::{Session, SessionError};
use tavern_transport::{Connection, ConnectionId, TransportError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::TavernError;
use crate::relay::{RelayCommand, RelayHandle};

/// Detaches the connection from the relay when the handler exits, however
/// it exits.
struct DetachGuard {
    id: ConnectionId,
    relay: RelayHandle,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        let _ = self.relay.send(RelayCommand::Detach { id: self.id });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<K>(conn: K, relay: RelayHandle) -> Result<(), TavernError>
where
    K: Connection<Error = TransportError>,
{
    let conn_id = conn.id();
    debug!(%conn_id, "handling new connection");

    let (outbox, mut frames) = mpsc::unbounded_channel::<Frame>();
    relay.send(RelayCommand::Attach { id: conn_id, outbox })?;
    let _guard = DetachGuard {
        id: conn_id,
        relay: relay.clone(),
    };

    let codec = JsonCodec;
    let mut session = Session::new(conn_id);

    loop {
        tokio::select! {
            Some(frame) = frames.recv() => {
                conn.send(&frame).await?;
            }
            incoming = conn.recv() => match incoming {
                Ok(Some(data)) => dispatch(&codec, &mut session, &relay, &data)?,
                Ok(None) => {
                    debug!(%conn_id, "connection closed cleanly");
                    break;
                }
                Err(e) => {
                    debug!(%conn_id, error = %e, "recv error");
                    break;
                }
            },
        }
    }

    if let Some(room) = session.close() {
        debug!(%conn_id, %room, "leaving room on disconnect");
    }
    Ok(())
}

/// Decodes one frame and forwards it to the relay. Malformed frames and
/// unknown kinds are dropped; the connection stays open.
fn dispatch(
    codec: &JsonCodec,
    session: &mut Session,
    relay: &RelayHandle,
    data: &[u8],
) -> Result<(), TavernError> {
    let conn_id = session.id();

    let envelope: Envelope = match codec.decode(data) {
        Ok(env) => env,
        Err(e) => {
            debug!(%conn_id, error = %e, "dropping malformed frame");
            return Ok(());
        }
    };
    let request = match Request::try_from(envelope) {
        Ok(request) => request,
        Err(e) => {
            debug!(%conn_id, error = %e, "ignoring message");
            return Ok(());
        }
    };

    match route(session, request) {
        Ok(commands) => {
            for command in commands {
                relay.send(command)?;
            }
            Ok(())
        }
        Err(e) => {
            debug!(%conn_id, error = %e, "request on closed session");
            Ok(())
        }
    }
}

/// Turns a request into relay commands, updating the session's binding.
///
/// Room-scoped requests go to the room they name, or to the bound room.
/// With neither, they are dropped.
fn route(session: &mut Session, request: Request) -> Result<Vec<RelayCommand>, SessionError> {
    let id = session.id();

    let room = match &request {
        Request::Join { .. } | Request::Leave => None,
        other => match session.target(other.room())? {
            Some(room) => Some(room),
            None => {
                debug!(conn_id = %id, "no room for request, dropped");
                return Ok(Vec::new());
            }
        },
    };

    let commands = match (request, room) {
        (Request::Join { room }, _) => {
            let plan = session.join(room)?;
            let mut commands = Vec::with_capacity(2);
            if plan.leave.is_some() {
                commands.push(RelayCommand::Leave { id });
            }
            commands.push(RelayCommand::Join { id, room: plan.join });
            commands
        }
        (Request::Leave, _) => match session.leave()? {
            Some(_) => vec![RelayCommand::Leave { id }],
            None => Vec::new(),
        },
        (Request::Broadcast { inner_kind, payload, .. }, Some(room)) => {
            vec![RelayCommand::Broadcast {
                id,
                room,
                inner_kind,
                payload,
            }]
        }
        (Request::Save { payload, .. }, Some(room)) => {
            vec![RelayCommand::Save { id, room, payload }]
        }
        (Request::RequestSnapshot { .. }, Some(room)) => {
            vec![RelayCommand::RequestSnapshot { id, room }]
        }
        (Request::Patch { payload, .. }, Some(room)) => {
            vec![RelayCommand::Patch { id, room, payload }]
        }
        (_, None) => Vec::new(),
    };
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tavern_protocol::RoomCode;

    use super::*;

    fn room(code: &str) -> RoomCode {
        RoomCode::parse(code).unwrap()
    }

    fn session() -> Session {
        Session::new(ConnectionId::new(1))
    }

    #[test]
    fn test_route_join_after_join_leaves_first() {
        let mut s = session();
        route(&mut s, Request::Join { room: room("A") }).unwrap();

        let commands = route(&mut s, Request::Join { room: room("B") }).unwrap();

        assert!(matches!(commands.as_slice(), [
            RelayCommand::Leave { .. },
            RelayCommand::Join { room, .. },
        ] if *room == RoomCode::parse("B").unwrap()));
    }

    #[test]
    fn test_route_uses_bound_room_when_request_names_none() {
        let mut s = session();
        route(&mut s, Request::Join { room: room("A") }).unwrap();

        let commands = route(&mut s, Request::Patch { room: None, payload: Some(json!(1)) }).unwrap();

        assert!(matches!(commands.as_slice(), [RelayCommand::Patch { room, .. }] if room.as_str() == "A"));
    }

    #[test]
    fn test_route_unbound_request_without_room_is_dropped() {
        let mut s = session();
        let commands = route(
            &mut s,
            Request::Save {
                room: None,
                payload: json!({"version": 1}),
            },
        )
        .unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn test_route_leave_when_unbound_sends_nothing() {
        let mut s = session();
        assert!(route(&mut s, Request::Leave).unwrap().is_empty());
    }

    #[test]
    fn test_route_on_closed_session_fails() {
        let mut s = session();
        s.close();
        let result = route(&mut s, Request::Join { room: room("A") });
        assert!(matches!(result, Err(SessionError::Closed(_))));
    }
}
