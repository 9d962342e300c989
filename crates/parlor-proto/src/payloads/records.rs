//! Shared records embedded in server events.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId, UserId};

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// Stable id
    pub user_id: UserId,
    /// Display name from the latest identity claim
    pub username: String,
    /// Online status
    pub connected: bool,
    /// Last connect/disconnect time, Unix milliseconds
    pub last_seen_ms: u64,
    /// Room the user currently occupies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_room: Option<RoomId>,
}

/// Public view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Configured id
    pub room_id: RoomId,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Current member count
    pub member_count: u32,
}

/// Message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Ordinary room message
    #[default]
    Text,
    /// Flagged private by the sender
    Private,
}

/// A message as stored in a room log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Globally unique id
    pub message_id: MessageId,
    /// Owning room
    pub room_id: RoomId,
    /// Position in the room log, starting at 0
    pub log_index: u64,
    /// Author id
    pub author_id: UserId,
    /// Author display name at send time
    pub author_name: String,
    /// Verbatim content
    pub content: String,
    /// Message kind
    pub kind: MessageKind,
    /// Send time, Unix milliseconds, non-decreasing within a room
    pub sent_at_ms: u64,
    /// Reaction per user, last write wins
    pub reactions: BTreeMap<UserId, String>,
    /// Users who have read the message, author included
    pub read_by: BTreeSet<UserId>,
}

/// A direct message. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessageRecord {
    /// Unique id
    pub message_id: MessageId,
    /// Sender id
    pub from_user_id: UserId,
    /// Sender display name
    pub from_username: String,
    /// Recipient id
    pub to_user_id: UserId,
    /// Verbatim content
    pub content: String,
    /// Send time, Unix milliseconds
    pub sent_at_ms: u64,
}
