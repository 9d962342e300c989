//! Client requests.

use serde::{Deserialize, Serialize};

use crate::{
    ids::{MessageId, RoomId, UserId},
    payloads::records::MessageKind,
};

/// Leave the current room and enter `room_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoom {
    /// Target room
    pub room_id: RoomId,
}

/// Post a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Target room
    pub room_id: RoomId,
    /// Verbatim content
    pub content: String,
    /// Defaults to text when absent
    #[serde(default)]
    pub kind: MessageKind,
}

/// Typing start/stop signal (opcode decides which).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    /// Room the user is typing in
    pub room_id: RoomId,
}

/// Set the caller's reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactToMessage {
    /// Message to react to
    pub message_id: MessageId,
    /// Room the message belongs to
    pub room_id: RoomId,
    /// Reaction symbol, must be non-empty
    pub reaction: String,
}

/// Mark a message as read by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkMessageRead {
    /// Message being acknowledged
    pub message_id: MessageId,
    /// Room the message belongs to
    pub room_id: RoomId,
}

/// Unicast a message to one connected user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPrivateMessage {
    /// Recipient
    pub to_user_id: UserId,
    /// Verbatim content
    pub content: String,
}
