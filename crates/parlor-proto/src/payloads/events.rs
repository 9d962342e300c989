//! Server events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::write_cbor;
use crate::{
    FrameHeader,
    errors::Result,
    ids::{MessageId, RoomId, UserId},
    payloads::records::{MessageRecord, PrivateMessageRecord, RoomSummary, UserSummary},
};

/// Directory snapshot sent to a newly active connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersList {
    /// Connected users in first-connection order
    pub users: Vec<UserSummary>,
}

/// Room catalogue in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomsList {
    /// Every configured room
    pub rooms: Vec<RoomSummary>,
}

/// Confirmation of a room switch with the room log.
///
/// A log too large for one frame is split across consecutive `RoomJoined`
/// frames; every part but the last has `more` set. Concatenating the
/// `history` of all parts yields the entire log in send order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomJoined {
    /// Room entered
    pub room: RoomSummary,
    /// A slice of the room log in send order
    pub history: Vec<MessageRecord>,
    /// Another part of the history follows
    #[serde(default)]
    pub more: bool,
}

impl RoomJoined {
    /// Split a room log into parts that each fit one frame.
    ///
    /// Always returns at least one part. A single record too large for a
    /// frame on its own gets a part to itself and fails at encode time.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if a record cannot be serialized
    pub fn split(room: RoomSummary, history: Vec<MessageRecord>) -> Result<Vec<Self>> {
        // Room summary, field names and the largest CBOR array header.
        let envelope =
            encoded_len(&Self { room: room.clone(), history: Vec::new(), more: true })? + 9;
        let budget = (FrameHeader::MAX_PAYLOAD_SIZE as usize).saturating_sub(envelope);

        let mut parts = Vec::new();
        let mut current = Vec::new();
        let mut used = 0;
        for record in history {
            let size = encoded_len(&record)?;
            if !current.is_empty() && used + size > budget {
                parts.push(std::mem::take(&mut current));
                used = 0;
            }
            used += size;
            current.push(record);
        }
        parts.push(current);

        let last = parts.len() - 1;
        Ok(parts
            .into_iter()
            .enumerate()
            .map(|(i, history)| Self { room: room.clone(), history, more: i < last })
            .collect())
    }
}

fn encoded_len<T: Serialize>(value: &T) -> Result<usize> {
    let mut buf = Vec::new();
    write_cbor(value, &mut buf)?;
    Ok(buf.len())
}

/// A message appended to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// The appended message
    pub message: MessageRecord,
}

/// Presence change (connected, disconnected, reconnected; opcode decides).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChanged {
    /// User state after the change
    pub user: UserSummary,
}

/// Someone entered or left a room (opcode decides).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMembershipChanged {
    /// Room affected
    pub room_id: RoomId,
    /// User who moved
    pub user_id: UserId,
    /// Their display name
    pub username: String,
}

/// Typing indicator relay (on/off decided by opcode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingChanged {
    /// Room the indicator belongs to
    pub room_id: RoomId,
    /// Typist
    pub user_id: UserId,
    /// Typist display name
    pub username: String,
}

/// A reaction was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReacted {
    /// Message reacted to
    pub message_id: MessageId,
    /// Its room
    pub room_id: RoomId,
    /// Reacting user
    pub user_id: UserId,
    /// Their reaction
    pub reaction: String,
    /// Full reaction map after the update
    pub reactions: BTreeMap<UserId, String>,
}

/// A read receipt was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRead {
    /// Message read
    pub message_id: MessageId,
    /// Its room
    pub room_id: RoomId,
    /// Reader
    pub user_id: UserId,
}

/// Direct message delivery (incoming or acknowledgement; opcode decides).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessageDelivered {
    /// The message
    pub message: PrivateMessageRecord,
}

/// Lightweight notice for room members other than the actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notice kind, e.g. `new_message`
    pub kind: String,
    /// Room the activity happened in
    pub room_id: RoomId,
    /// Human-readable text
    pub message: String,
    /// Actor display name
    pub from: String,
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::{Payload, payloads::records::MessageKind};

    fn summary() -> RoomSummary {
        RoomSummary {
            room_id: RoomId::from("general"),
            name: "General".to_string(),
            description: "General chat room".to_string(),
            member_count: 1,
        }
    }

    fn record(index: u64, content_len: usize) -> MessageRecord {
        MessageRecord {
            message_id: MessageId::from_u128(u128::from(index)),
            room_id: RoomId::from("general"),
            log_index: index,
            author_id: UserId::from("u1"),
            author_name: "Alice".to_string(),
            content: "x".repeat(content_len),
            kind: MessageKind::Text,
            sent_at_ms: 1_700_000_000_000,
            reactions: BTreeMap::new(),
            read_by: BTreeSet::from([UserId::from("u1")]),
        }
    }

    #[test]
    fn empty_history_is_one_final_part() {
        let parts = RoomJoined::split(summary(), Vec::new()).unwrap();

        assert_eq!(parts.len(), 1);
        assert!(parts[0].history.is_empty());
        assert!(!parts[0].more);
    }

    #[test]
    fn small_history_stays_in_one_frame() {
        let history: Vec<_> = (0..3).map(|i| record(i, 10)).collect();
        let parts = RoomJoined::split(summary(), history.clone()).unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].history, history);
        assert!(!parts[0].more);
    }

    #[test]
    fn large_history_splits_into_encodable_parts() {
        let history: Vec<_> = (0..12).map(|i| record(i, 100_000)).collect();
        let parts = RoomJoined::split(summary(), history.clone()).unwrap();

        assert!(parts.len() > 1);
        assert!(parts[..parts.len() - 1].iter().all(|part| part.more));
        assert!(!parts[parts.len() - 1].more);

        for part in &parts {
            let frame = Payload::RoomJoined(part.clone()).into_frame().unwrap();
            assert!(frame.to_vec().is_ok());
        }

        let rejoined: Vec<_> = parts.into_iter().flat_map(|part| part.history).collect();
        assert_eq!(rejoined, history);
    }
}
