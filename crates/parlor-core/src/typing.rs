//! Ephemeral typing indicators.
//!
//! The relay only forwards start/stop signals; this tracker exists so a user
//! who leaves a room or drops off mid-sentence gets a synthetic stop instead
//! of an indicator stuck on every other screen. Entries never time out.

use std::collections::{BTreeSet, HashMap};

use parlor_proto::{RoomId, UserId};

/// Set of `(room, user)` pairs currently typing.
#[derive(Debug, Default, Clone)]
pub struct TypingTracker {
    typing: HashMap<UserId, BTreeSet<RoomId>>,
}

impl TypingTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a start signal. Returns `true` if the user was not already
    /// typing in the room.
    pub fn start(&mut self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.typing.entry(user_id.clone()).or_default().insert(room_id.clone())
    }

    /// Record a stop signal. Returns `true` if the user was typing.
    pub fn stop(&mut self, room_id: &RoomId, user_id: &UserId) -> bool {
        let Some(rooms) = self.typing.get_mut(user_id) else {
            return false;
        };
        let removed = rooms.remove(room_id);
        if rooms.is_empty() {
            self.typing.remove(user_id);
        }
        removed
    }

    /// Forget everything `user_id` was typing. Returns the affected rooms.
    pub fn clear_user(&mut self, user_id: &UserId) -> Vec<RoomId> {
        self.typing.remove(user_id).map(|rooms| rooms.into_iter().collect()).unwrap_or_default()
    }

    /// User is typing in the room.
    pub fn is_typing(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.typing.get(user_id).is_some_and(|rooms| rooms.contains(room_id))
    }

    /// Number of `(room, user)` pairs.
    pub fn len(&self) -> usize {
        self.typing.values().map(BTreeSet::len).sum()
    }

    /// Nobody is typing.
    pub fn is_empty(&self) -> bool {
        self.typing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_roundtrip() {
        let mut typing = TypingTracker::new();
        let (room, user) = (RoomId::from("general"), UserId::from("u1"));

        assert!(typing.start(&room, &user));
        assert!(!typing.start(&room, &user));
        assert!(typing.is_typing(&room, &user));

        assert!(typing.stop(&room, &user));
        assert!(!typing.stop(&room, &user));
        assert!(typing.is_empty());
    }

    #[test]
    fn clear_user_reports_rooms() {
        let mut typing = TypingTracker::new();
        let user = UserId::from("u1");
        typing.start(&RoomId::from("random"), &user);
        typing.start(&RoomId::from("general"), &user);
        typing.start(&RoomId::from("general"), &UserId::from("u2"));

        let rooms = typing.clear_user(&user);

        assert_eq!(rooms, [RoomId::from("general"), RoomId::from("random")]);
        assert_eq!(typing.len(), 1);
        assert!(typing.clear_user(&user).is_empty());
    }
}
