//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the engine state at a point in time. Invariants operate
//! on snapshots rather than live state so a check sees one consistent view,
//! and two snapshots can be compared across an operation.

use std::collections::{BTreeMap, BTreeSet};

use parlor_core::{Environment, SessionId, SessionState};
use parlor_proto::{MessageId, RoomId, UserId};
use parlor_server::ServerDriver;
use serde::Serialize;

/// Snapshot of the whole relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemSnapshot {
    /// Presence records in directory order.
    pub users: Vec<UserSnapshot>,
    /// Rooms in configuration order.
    pub rooms: Vec<RoomSnapshot>,
}

/// One presence record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSnapshot {
    /// Stable id.
    pub user_id: UserId,
    /// Online flag as reported.
    pub connected: bool,
    /// Connection reference as stored.
    pub connection: Option<SessionId>,
    /// Lifecycle state of that connection, `None` if it is not live.
    #[serde(skip)]
    pub connection_state: Option<SessionState>,
    /// Room recorded in presence.
    pub current_room: Option<RoomId>,
}

/// One room with its log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    /// Room id.
    pub room_id: RoomId,
    /// Members in join order.
    pub members: Vec<UserId>,
    /// Log in append order.
    pub messages: Vec<MessageSnapshot>,
}

/// One logged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSnapshot {
    /// Message id.
    #[serde(skip)]
    pub message_id: MessageId,
    /// Position in the room log.
    pub log_index: u64,
    /// Author.
    pub author_id: UserId,
    /// Body.
    pub content: String,
    /// Server timestamp, Unix millis.
    pub sent_at_ms: u64,
    /// Reaction per user.
    pub reactions: BTreeMap<UserId, String>,
    /// Users who have read it.
    pub read_by: BTreeSet<UserId>,
}

impl SystemSnapshot {
    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capture the driver's current state.
    pub fn capture<E: Environment>(driver: &ServerDriver<E>) -> Self {
        let users = driver
            .presence()
            .snapshot()
            .map(|user| UserSnapshot {
                user_id: user.user_id().clone(),
                connected: user.connected(),
                connection: user.connection(),
                connection_state: user.connection().and_then(|id| driver.session_state(id)),
                current_room: user.current_room().cloned(),
            })
            .collect();

        let rooms = driver
            .rooms()
            .list_rooms()
            .map(|room| {
                let messages = driver
                    .message_log()
                    .history(room.id())
                    .unwrap_or_default()
                    .iter()
                    .map(|m| MessageSnapshot {
                        message_id: m.message_id.clone(),
                        log_index: m.log_index,
                        author_id: m.author_id.clone(),
                        content: m.content.clone(),
                        sent_at_ms: m.sent_at_ms,
                        reactions: m.reactions.clone(),
                        read_by: m.read_by.clone(),
                    })
                    .collect();

                RoomSnapshot {
                    room_id: room.id().clone(),
                    members: room.members().to_vec(),
                    messages,
                }
            })
            .collect();

        Self { users, rooms }
    }

    /// Look up a room.
    pub fn room(&self, room_id: &RoomId) -> Option<&RoomSnapshot> {
        self.rooms.iter().find(|room| &room.room_id == room_id)
    }

    /// Look up a user.
    pub fn user(&self, user_id: &UserId) -> Option<&UserSnapshot> {
        self.users.iter().find(|user| &user.user_id == user_id)
    }

    /// Total messages across rooms.
    pub fn message_count(&self) -> usize {
        self.rooms.iter().map(|room| room.messages.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimEnv, SimRelay};

    #[test]
    fn empty_snapshot() {
        let snapshot = SystemSnapshot::empty();
        assert!(snapshot.users.is_empty());
        assert_eq!(snapshot.message_count(), 0);
    }

    #[test]
    fn fresh_relay_has_empty_rooms() {
        let relay = SimRelay::new(SimEnv::new()).unwrap();
        let snapshot = SystemSnapshot::capture(relay.driver());

        let ids: Vec<_> = snapshot.rooms.iter().map(|r| r.room_id.as_str()).collect();
        assert_eq!(ids, ["general", "random"]);
        assert!(snapshot.room(&RoomId::from("general")).unwrap().members.is_empty());
    }
}
