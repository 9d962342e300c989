//! Parlor wire protocol.
//!
//! Every message exchanged between a chat client and the relay is a [`Frame`]:
//! a fixed 16-byte binary header followed by a CBOR payload. The header is
//! parsed zero-copy so the server can validate framing and dispatch on the
//! opcode before touching the payload.
//!
//! # Layout
//!
//! ```text
//! ┌────────────────────────────── 16 bytes ─────────────────────────────┐
//! │ magic "PRLR" │ ver │ flags │ opcode │  request_id  │  payload_size  │
//! │   4 bytes    │  1  │   1   │   2    │   4 bytes    │    4 bytes     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`header`]: fixed binary header
//! - [`frame`]: header + raw payload bytes
//! - [`payloads`]: typed CBOR payloads, one per [`Opcode`]
//! - [`ids`]: string identifiers for users, rooms and messages

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod header;
pub mod ids;
pub mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use ids::{MessageId, RoomId, UserId};
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload};

/// ALPN identifier negotiated on QUIC connections.
pub const ALPN_PROTOCOL: &[u8] = b"parlor";
