//! Connection sessions for Tavern.
//!
//! Every live connection on the relay has one [`Session`] that remembers
//! which room, if any, the connection is bound to. The session does not
//! touch the room registry itself; it tells the caller what to do through
//! a [`JoinPlan`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Relay (above)    ← executes the plans against the room registry
//!     ↕
//! Session (this crate)  ← one binding per connection
//!     ↕
//! Protocol (below) ← provides RoomCode
//! ```

mod error;
mod session;

pub use error::SessionError;
pub use session::{JoinPlan, Session, SessionState};
