//! Room membership for Tavern.
//!
//! A room is nothing more than the set of connections currently bound to
//! one [`RoomCode`](tavern_protocol::RoomCode). It appears on the first
//! join and disappears the moment its last member leaves.
//!
//! # Key types
//!
//! - [`RoomRegistry`]: who is in which room; fans frames out to a room
//! - [`Outbox`] / [`Frame`]: the per-connection delivery channel and the
//!   pre-encoded bytes that travel through it

mod registry;
mod room;

pub use registry::{JoinOutcome, RoomRegistry};
pub use room::{Frame, Outbox};
use room::Room;
