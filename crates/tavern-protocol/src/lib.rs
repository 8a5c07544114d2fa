//! Wire protocol for Tavern.
//!
//! This crate defines what relay and clients say to each other:
//!
//! - **Types** ([`Envelope`], [`Request`], [`RoomCode`]): the message
//!   structures that travel on the wire and the typed requests the relay
//!   acts on.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how envelopes become
//!   bytes and back.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the relay
//! and client. It knows nothing about connections, rooms, or storage.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope / Request) → Relay / Client
//! ```
//!
//! Snapshot payloads are opaque JSON. The only field anyone reads is the
//! integer `version` (see [`snapshot_version`]).

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    Envelope, Request, RoomCode, kind, set_snapshot_version, snapshot_version,
};
