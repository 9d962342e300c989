//! CBOR-encoded protocol payloads.
//!
//! The header is raw binary; payloads use CBOR so records can grow optional
//! fields without breaking older peers. The opcode in the header selects the
//! payload type, so only the inner struct is serialized (no variant tag).
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Several variants share a body struct where the opcode
//! alone carries the distinction (typing on/off, presence changes).

pub mod events;
pub mod records;
pub mod requests;
pub mod session;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
    ids::{MessageId, RoomId, UserId},
};

/// All possible frame payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session
    /// Handshake with identity claim
    Hello(session::Hello),
    /// Graceful disconnect
    Goodbye(session::Goodbye),

    // Requests
    /// Switch rooms
    JoinRoom(requests::JoinRoom),
    /// Post a message
    SendMessage(requests::SendMessage),
    /// Typing started
    TypingStart(requests::TypingSignal),
    /// Typing stopped
    TypingStop(requests::TypingSignal),
    /// Set a reaction
    ReactToMessage(requests::ReactToMessage),
    /// Acknowledge a message
    MarkMessageRead(requests::MarkMessageRead),
    /// Direct message
    SendPrivateMessage(requests::SendPrivateMessage),

    // Events
    /// Connected users
    UsersList(events::UsersList),
    /// Configured rooms
    RoomsList(events::RoomsList),
    /// Room entered with history
    RoomJoined(events::RoomJoined),
    /// Message appended
    NewMessage(events::NewMessage),
    /// New identity came online
    UserConnected(events::PresenceChanged),
    /// User went offline
    UserDisconnected(events::PresenceChanged),
    /// Known identity came back online
    UserReconnected(events::PresenceChanged),
    /// Someone entered the room
    UserJoinedRoom(events::RoomMembershipChanged),
    /// Someone left the room
    UserLeftRoom(events::RoomMembershipChanged),
    /// Typing indicator on
    UserTyping(events::TypingChanged),
    /// Typing indicator off
    UserStopTyping(events::TypingChanged),
    /// Reaction recorded
    MessageReacted(events::MessageReacted),
    /// Read receipt recorded
    MessageRead(events::MessageRead),
    /// Incoming direct message
    PrivateMessage(events::PrivateMessageDelivered),
    /// Outgoing direct message acknowledged
    PrivateMessageSent(events::PrivateMessageDelivered),
    /// Activity notice
    Notification(events::Notification),

    /// Error report
    Error(ErrorPayload),
}

/// Error report sent to the connection whose request failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code
    pub code: u16,
    /// Human-readable message
    pub message: String,
}

impl ErrorPayload {
    /// Requested room does not exist.
    pub const ROOM_NOT_FOUND: u16 = 0x0001;
    /// Message id unknown in the stated room.
    pub const MESSAGE_NOT_FOUND: u16 = 0x0002;
    /// Direct message target is offline or unknown.
    pub const USER_UNAVAILABLE: u16 = 0x0003;
    /// Request could not be decoded or is not valid in this state.
    pub const MALFORMED_REQUEST: u16 = 0x0004;
    /// Unexpected server fault.
    pub const INTERNAL: u16 = 0x00FF;

    /// Room not found.
    #[must_use]
    pub fn room_not_found(room_id: &RoomId) -> Self {
        Self { code: Self::ROOM_NOT_FOUND, message: format!("Room not found: {room_id}") }
    }

    /// Message not found.
    #[must_use]
    pub fn message_not_found(message_id: &MessageId, room_id: &RoomId) -> Self {
        Self {
            code: Self::MESSAGE_NOT_FOUND,
            message: format!("Message not found: {message_id} in room {room_id}"),
        }
    }

    /// Target user offline.
    #[must_use]
    pub fn user_unavailable(user_id: &UserId) -> Self {
        Self { code: Self::USER_UNAVAILABLE, message: format!("User not available: {user_id}") }
    }

    /// Malformed request.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self { code: Self::MALFORMED_REQUEST, message: reason.into() }
    }

    /// Opaque internal error.
    #[must_use]
    pub fn internal() -> Self {
        Self { code: Self::INTERNAL, message: "Internal server error".to_string() }
    }
}

fn write_cbor<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    ciborium::ser::into_writer(value, dst.writer())
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn read_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::JoinRoom(_) => Opcode::JoinRoom,
            Self::SendMessage(_) => Opcode::SendMessage,
            Self::TypingStart(_) => Opcode::TypingStart,
            Self::TypingStop(_) => Opcode::TypingStop,
            Self::ReactToMessage(_) => Opcode::ReactToMessage,
            Self::MarkMessageRead(_) => Opcode::MarkMessageRead,
            Self::SendPrivateMessage(_) => Opcode::SendPrivateMessage,
            Self::UsersList(_) => Opcode::UsersList,
            Self::RoomsList(_) => Opcode::RoomsList,
            Self::RoomJoined(_) => Opcode::RoomJoined,
            Self::NewMessage(_) => Opcode::NewMessage,
            Self::UserConnected(_) => Opcode::UserConnected,
            Self::UserDisconnected(_) => Opcode::UserDisconnected,
            Self::UserReconnected(_) => Opcode::UserReconnected,
            Self::UserJoinedRoom(_) => Opcode::UserJoinedRoom,
            Self::UserLeftRoom(_) => Opcode::UserLeftRoom,
            Self::UserTyping(_) => Opcode::UserTyping,
            Self::UserStopTyping(_) => Opcode::UserStopTyping,
            Self::MessageReacted(_) => Opcode::MessageReacted,
            Self::MessageRead(_) => Opcode::MessageRead,
            Self::PrivateMessage(_) => Opcode::PrivateMessage,
            Self::PrivateMessageSent(_) => Opcode::PrivateMessageSent,
            Self::Notification(_) => Opcode::Notification,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode the inner struct as CBOR into `dst`.
    ///
    /// Does not enforce the size limit; [`Frame::encode`] does.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Hello(inner) => write_cbor(inner, dst),
            Self::Goodbye(inner) => write_cbor(inner, dst),
            Self::JoinRoom(inner) => write_cbor(inner, dst),
            Self::SendMessage(inner) => write_cbor(inner, dst),
            Self::TypingStart(inner) | Self::TypingStop(inner) => write_cbor(inner, dst),
            Self::ReactToMessage(inner) => write_cbor(inner, dst),
            Self::MarkMessageRead(inner) => write_cbor(inner, dst),
            Self::SendPrivateMessage(inner) => write_cbor(inner, dst),
            Self::UsersList(inner) => write_cbor(inner, dst),
            Self::RoomsList(inner) => write_cbor(inner, dst),
            Self::RoomJoined(inner) => write_cbor(inner, dst),
            Self::NewMessage(inner) => write_cbor(inner, dst),
            Self::UserConnected(inner)
            | Self::UserDisconnected(inner)
            | Self::UserReconnected(inner) => write_cbor(inner, dst),
            Self::UserJoinedRoom(inner) | Self::UserLeftRoom(inner) => write_cbor(inner, dst),
            Self::UserTyping(inner) | Self::UserStopTyping(inner) => write_cbor(inner, dst),
            Self::MessageReacted(inner) => write_cbor(inner, dst),
            Self::MessageRead(inner) => write_cbor(inner, dst),
            Self::PrivateMessage(inner) | Self::PrivateMessageSent(inner) => {
                write_cbor(inner, dst)
            },
            Self::Notification(inner) => write_cbor(inner, dst),
            Self::Error(inner) => write_cbor(inner, dst),
        }
    }

    /// Decode a payload body for the given opcode.
    ///
    /// The size check runs before CBOR parsing.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if `bytes` exceeds the limit
    /// - `ProtocolError::CborDecode` if the body does not match the opcode
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Hello => Self::Hello(read_cbor(bytes)?),
            Opcode::Goodbye => Self::Goodbye(read_cbor(bytes)?),
            Opcode::JoinRoom => Self::JoinRoom(read_cbor(bytes)?),
            Opcode::SendMessage => Self::SendMessage(read_cbor(bytes)?),
            Opcode::TypingStart => Self::TypingStart(read_cbor(bytes)?),
            Opcode::TypingStop => Self::TypingStop(read_cbor(bytes)?),
            Opcode::ReactToMessage => Self::ReactToMessage(read_cbor(bytes)?),
            Opcode::MarkMessageRead => Self::MarkMessageRead(read_cbor(bytes)?),
            Opcode::SendPrivateMessage => Self::SendPrivateMessage(read_cbor(bytes)?),
            Opcode::UsersList => Self::UsersList(read_cbor(bytes)?),
            Opcode::RoomsList => Self::RoomsList(read_cbor(bytes)?),
            Opcode::RoomJoined => Self::RoomJoined(read_cbor(bytes)?),
            Opcode::NewMessage => Self::NewMessage(read_cbor(bytes)?),
            Opcode::UserConnected => Self::UserConnected(read_cbor(bytes)?),
            Opcode::UserDisconnected => Self::UserDisconnected(read_cbor(bytes)?),
            Opcode::UserReconnected => Self::UserReconnected(read_cbor(bytes)?),
            Opcode::UserJoinedRoom => Self::UserJoinedRoom(read_cbor(bytes)?),
            Opcode::UserLeftRoom => Self::UserLeftRoom(read_cbor(bytes)?),
            Opcode::UserTyping => Self::UserTyping(read_cbor(bytes)?),
            Opcode::UserStopTyping => Self::UserStopTyping(read_cbor(bytes)?),
            Opcode::MessageReacted => Self::MessageReacted(read_cbor(bytes)?),
            Opcode::MessageRead => Self::MessageRead(read_cbor(bytes)?),
            Opcode::PrivateMessage => Self::PrivateMessage(read_cbor(bytes)?),
            Opcode::PrivateMessageSent => Self::PrivateMessageSent(read_cbor(bytes)?),
            Opcode::Notification => Self::Notification(read_cbor(bytes)?),
            Opcode::Error => Self::Error(read_cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Encode into a frame with a fresh header.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        self.into_reply(0)
    }

    /// Encode into a frame that echoes `request_id`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    /// - `ProtocolError::PayloadTooLarge` if the body exceeds
    ///   [`FrameHeader::MAX_PAYLOAD_SIZE`]
    pub fn into_reply(self, request_id: u32) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        if buf.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: buf.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }
        Ok(Frame::new(FrameHeader::reply(self.opcode(), request_id), buf))
    }

    /// Decode the payload of a frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the opcode is unassigned
    /// - Any error from [`Payload::decode`]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or_else(|| ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}
