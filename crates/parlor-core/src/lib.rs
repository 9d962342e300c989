//! Parlor engine core.
//!
//! Pure, I/O-free components of the room broadcast engine. Nothing in this
//! crate touches a socket, the system clock or the OS RNG: time and
//! randomness come from an injected [`Environment`], and every operation is a
//! synchronous mutation that reports what changed. The server crate composes
//! these pieces behind a single driver and turns the results into outbound
//! frames.
//!
//! # Components
//!
//! - [`identity`]: credential → identity, never fails
//! - [`presence`]: who is online, reconnect detection, grace-window expiry
//! - [`rooms`]: fixed room set with exclusive membership
//! - [`message_log`]: append-only per-room history with reactions and
//!   read receipts
//! - [`typing`]: ephemeral typing indicators
//! - [`router`]: audience → recipient sessions
//! - [`session`]: per-connection lifecycle state machine
//! - [`error`]: client-visible error taxonomy

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod identity;
pub mod message_log;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod session;
pub mod typing;

pub use env::Environment;
pub use error::{EngineError, SessionError};
pub use identity::{Identity, IdentityResolver, IdentitySource};
pub use message_log::{LogError, MessageLog, NewMessage};
pub use presence::{PresenceDirectory, RegisterOutcome, SessionId, User};
pub use rooms::{JoinOutcome, Room, RoomError, RoomRegistry, RoomSpec};
pub use router::{Audience, resolve};
pub use session::{Session, SessionState};
pub use typing::TypingTracker;
