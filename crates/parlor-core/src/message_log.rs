//! Per-room message log.
//!
//! Each configured room owns an append-only log. Messages are never removed
//! or reordered; after append only the reaction map and the read-by set
//! change. Every append gets the room's next log index, and send timestamps
//! are clamped so they never decrease within a room even if the wall clock
//! steps backwards.
//!
//! # Invariants
//!
//! - `log_index` equals the message's position in its room log.
//! - `sent_at_ms` is non-decreasing along a room log.
//! - `read_by` only grows and always contains the author.
//! - The id index points at exactly one live message per id.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parlor_proto::{
    MessageId, RoomId, UserId,
    payloads::records::{MessageKind, MessageRecord},
};
use thiserror::Error;

/// Message log errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// Room has no log
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// Message id unknown in the stated room
    #[error("message {message_id} not found in room {room_id}")]
    MessageNotFound {
        /// Requested message
        message_id: MessageId,
        /// Room it was looked up in
        room_id: RoomId,
    },
}

/// Fields of a message supplied by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Pre-generated unique id
    pub message_id: MessageId,
    /// Author id
    pub author_id: UserId,
    /// Author display name at send time
    pub author_name: String,
    /// Verbatim content
    pub content: String,
    /// Message kind
    pub kind: MessageKind,
}

#[derive(Debug, Default)]
struct RoomLog {
    messages: Vec<MessageRecord>,
    next_log_index: u64,
    last_sent_at_ms: u64,
}

/// Ordered message logs for every room.
#[derive(Debug, Default)]
pub struct MessageLog {
    rooms: HashMap<RoomId, RoomLog>,
    /// Message id → (room, position)
    index: HashMap<MessageId, (RoomId, usize)>,
}

impl MessageLog {
    /// Create empty logs for the given rooms.
    pub fn new<'a>(room_ids: impl IntoIterator<Item = &'a RoomId>) -> Self {
        let rooms = room_ids.into_iter().map(|id| (id.clone(), RoomLog::default())).collect();
        Self { rooms, index: HashMap::new() }
    }

    /// Append a message to a room log.
    ///
    /// The author is recorded as the first reader and reactions start empty.
    ///
    /// # Errors
    ///
    /// - `LogError::RoomNotFound` if the room has no log
    pub fn append(
        &mut self,
        room_id: &RoomId,
        message: NewMessage,
        now_ms: u64,
    ) -> Result<&MessageRecord, LogError> {
        let log = self.rooms.get_mut(room_id).ok_or_else(|| LogError::RoomNotFound(room_id.clone()))?;

        debug_assert!(
            !self.index.contains_key(&message.message_id),
            "message id collision: {}",
            message.message_id
        );

        let log_index = log.next_log_index;
        let sent_at_ms = now_ms.max(log.last_sent_at_ms);
        let position = log.messages.len();
        debug_assert_eq!(log_index, position as u64);

        let NewMessage { message_id, author_id, author_name, content, kind } = message;
        let record = MessageRecord {
            message_id: message_id.clone(),
            room_id: room_id.clone(),
            log_index,
            read_by: BTreeSet::from([author_id.clone()]),
            author_id,
            author_name,
            content,
            kind,
            sent_at_ms,
            reactions: BTreeMap::new(),
        };

        log.messages.push(record);
        log.next_log_index += 1;
        log.last_sent_at_ms = sent_at_ms;
        self.index.insert(message_id, (room_id.clone(), position));

        Ok(&log.messages[position])
    }

    /// Set `user_id`'s reaction on a message, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// - `LogError::MessageNotFound` if the id is unknown in `room_id`
    pub fn react(
        &mut self,
        message_id: &MessageId,
        room_id: &RoomId,
        user_id: &UserId,
        reaction: &str,
    ) -> Result<&MessageRecord, LogError> {
        let message = self.locate_mut(message_id, room_id)?;
        message.reactions.insert(user_id.clone(), reaction.to_owned());
        Ok(message)
    }

    /// Add `user_id` to a message's read-by set.
    ///
    /// Returns the message and whether the set changed. Repeating the call is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// - `LogError::MessageNotFound` if the id is unknown in `room_id`
    pub fn mark_read(
        &mut self,
        message_id: &MessageId,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(&MessageRecord, bool), LogError> {
        let message = self.locate_mut(message_id, room_id)?;
        let newly_read = message.read_by.insert(user_id.clone());
        Ok((message, newly_read))
    }

    /// Entire room log in send order.
    ///
    /// # Errors
    ///
    /// - `LogError::RoomNotFound` if the room has no log
    pub fn history(&self, room_id: &RoomId) -> Result<&[MessageRecord], LogError> {
        self.rooms
            .get(room_id)
            .map(|log| log.messages.as_slice())
            .ok_or_else(|| LogError::RoomNotFound(room_id.clone()))
    }

    /// Message by id, only if it belongs to `room_id`.
    pub fn get(&self, message_id: &MessageId, room_id: &RoomId) -> Option<&MessageRecord> {
        let (owner, position) = self.index.get(message_id)?;
        if owner != room_id {
            return None;
        }
        self.rooms.get(owner).and_then(|log| log.messages.get(*position))
    }

    /// Messages across all rooms.
    pub fn total_messages(&self) -> usize {
        self.index.len()
    }

    fn locate_mut(
        &mut self,
        message_id: &MessageId,
        room_id: &RoomId,
    ) -> Result<&mut MessageRecord, LogError> {
        let not_found =
            || LogError::MessageNotFound { message_id: message_id.clone(), room_id: room_id.clone() };

        let position = match self.index.get(message_id) {
            Some((owner, position)) if owner == room_id => *position,
            _ => return Err(not_found()),
        };

        self.rooms
            .get_mut(room_id)
            .and_then(|log| log.messages.get_mut(position))
            .ok_or_else(not_found)
    }
}
