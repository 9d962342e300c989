//! Room registry.
//!
//! Rooms are provisioned once from configuration and never created or
//! destroyed at runtime; only membership changes. The registry keeps a
//! user → room index next to the per-room member lists so exclusivity can be
//! enforced and disconnect cleanup is a single lookup.
//!
//! # Invariants
//!
//! - A user id appears in at most one room's member list.
//! - `member_of[u] == r` iff `u` is in `r`'s member list.
//! - A failed join leaves all membership untouched.

use std::collections::HashMap;

use parlor_proto::{RoomId, UserId, payloads::records::RoomSummary};
use thiserror::Error;

/// Room registry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// Room id not configured
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// Same id configured twice
    #[error("duplicate room id in configuration: {0}")]
    DuplicateRoom(RoomId),

    /// Configuration lists no rooms
    #[error("at least one room must be configured")]
    NoRooms,
}

/// Static room definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSpec {
    /// Room id
    pub id: RoomId,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
}

impl RoomSpec {
    /// Build a spec.
    pub fn new(id: impl Into<RoomId>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), description: description.into() }
    }

    /// The stock rooms: `general` and `random`.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("general", "General", "General chat room"),
            Self::new("random", "Random", "Random discussions"),
        ]
    }
}

/// A configured room and its current members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    spec: RoomSpec,
    /// Members in join order
    members: Vec<UserId>,
}

impl Room {
    /// Room id.
    pub fn id(&self) -> &RoomId {
        &self.spec.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.spec.description
    }

    /// Members in join order.
    pub fn members(&self) -> &[UserId] {
        &self.members
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Wire view.
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            description: self.spec.description.clone(),
            member_count: u32::try_from(self.members.len()).unwrap_or(u32::MAX),
        }
    }

    fn remove(&mut self, user_id: &UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != user_id);
        self.members.len() != before
    }
}

/// Result of a successful [`RoomRegistry::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room the user left to make the move, if any
    pub previous: Option<RoomId>,
    /// User was already in the target room; nothing changed
    pub already_member: bool,
}

/// Fixed set of rooms with exclusive membership.
#[derive(Debug, Clone)]
pub struct RoomRegistry {
    /// Rooms in configuration order
    rooms: Vec<Room>,
    /// Room id → position in `rooms`
    index: HashMap<RoomId, usize>,
    /// User id → room they are in
    member_of: HashMap<UserId, RoomId>,
}

impl RoomRegistry {
    /// Provision rooms from configuration.
    ///
    /// # Errors
    ///
    /// - `RoomError::NoRooms` if `specs` is empty
    /// - `RoomError::DuplicateRoom` if an id repeats
    pub fn new(specs: impl IntoIterator<Item = RoomSpec>) -> Result<Self, RoomError> {
        let mut rooms = Vec::new();
        let mut index = HashMap::new();

        for spec in specs {
            if index.contains_key(&spec.id) {
                return Err(RoomError::DuplicateRoom(spec.id));
            }
            index.insert(spec.id.clone(), rooms.len());
            rooms.push(Room { spec, members: Vec::new() });
        }

        if rooms.is_empty() {
            return Err(RoomError::NoRooms);
        }

        Ok(Self { rooms, index, member_of: HashMap::new() })
    }

    /// Rooms in configuration order.
    pub fn list_rooms(&self) -> impl Iterator<Item = &Room> + '_ {
        self.rooms.iter()
    }

    /// Room by id.
    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.index.get(room_id).and_then(|&i| self.rooms.get(i))
    }

    /// Room is configured.
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.index.contains_key(room_id)
    }

    /// Move `user_id` into `room_id`, leaving their previous room first.
    ///
    /// # Errors
    ///
    /// - `RoomError::RoomNotFound` if `room_id` is not configured; membership
    ///   is unchanged
    pub fn join(&mut self, user_id: &UserId, room_id: &RoomId) -> Result<JoinOutcome, RoomError> {
        let target =
            *self.index.get(room_id).ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

        if self.member_of.get(user_id) == Some(room_id) {
            return Ok(JoinOutcome { previous: None, already_member: true });
        }

        let previous = self.leave_all(user_id);

        if let Some(room) = self.rooms.get_mut(target) {
            room.members.push(user_id.clone());
        }
        self.member_of.insert(user_id.clone(), room_id.clone());

        Ok(JoinOutcome { previous, already_member: false })
    }

    /// Remove `user_id` from `room_id`. No-op if not a member.
    ///
    /// Returns `true` if membership changed.
    pub fn leave(&mut self, user_id: &UserId, room_id: &RoomId) -> bool {
        if self.member_of.get(user_id) != Some(room_id) {
            return false;
        }
        self.leave_all(user_id).is_some()
    }

    /// Remove `user_id` from whatever room they are in.
    pub fn leave_all(&mut self, user_id: &UserId) -> Option<RoomId> {
        let room_id = self.member_of.remove(user_id)?;
        if let Some(room) = self.index.get(&room_id).and_then(|&i| self.rooms.get_mut(i)) {
            let removed = room.remove(user_id);
            debug_assert!(removed, "member index out of sync for {user_id}");
        }
        Some(room_id)
    }

    /// Room a user is in.
    pub fn room_of(&self, user_id: &UserId) -> Option<&RoomId> {
        self.member_of.get(user_id)
    }

    /// Member count. `None` for unknown rooms.
    pub fn member_count(&self, room_id: &RoomId) -> Option<usize> {
        self.get(room_id).map(Room::member_count)
    }

    /// Members of a room in join order. Empty for unknown rooms.
    pub fn members(&self, room_id: &RoomId) -> &[UserId] {
        self.get(room_id).map_or(&[][..], Room::members)
    }

    /// Rooms with at least one member.
    pub fn active_room_count(&self) -> usize {
        self.rooms.iter().filter(|r| !r.members.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(RoomSpec::defaults()).unwrap()
    }

    fn general() -> RoomId {
        RoomId::from("general")
    }

    fn random() -> RoomId {
        RoomId::from("random")
    }

    #[test]
    fn rooms_listed_in_config_order() {
        let reg = registry();
        let names: Vec<_> = reg.list_rooms().map(Room::name).collect();
        assert_eq!(names, ["General", "Random"]);
    }

    #[test]
    fn rejects_empty_and_duplicate_config() {
        assert_eq!(RoomRegistry::new(Vec::new()).err(), Some(RoomError::NoRooms));

        let specs = vec![RoomSpec::new("a", "A", ""), RoomSpec::new("a", "A again", "")];
        assert_eq!(RoomRegistry::new(specs).err(), Some(RoomError::DuplicateRoom("a".into())));
    }

    #[test]
    fn join_moves_user_exclusively() {
        let mut reg = registry();
        let u1 = UserId::from("u1");

        let first = reg.join(&u1, &general()).unwrap();
        assert_eq!(first, JoinOutcome { previous: None, already_member: false });

        let second = reg.join(&u1, &random()).unwrap();
        assert_eq!(second.previous, Some(general()));
        assert_eq!(reg.member_count(&general()), Some(0));
        assert_eq!(reg.members(&random()), [u1.clone()]);
        assert_eq!(reg.room_of(&u1), Some(&random()));
    }

    #[test]
    fn rejoining_same_room_is_noop() {
        let mut reg = registry();
        let u1 = UserId::from("u1");

        reg.join(&u1, &general()).unwrap();
        let outcome = reg.join(&u1, &general()).unwrap();

        assert!(outcome.already_member);
        assert_eq!(reg.member_count(&general()), Some(1));
    }

    #[test]
    fn failed_join_keeps_membership() {
        let mut reg = registry();
        let u1 = UserId::from("u1");
        reg.join(&u1, &general()).unwrap();

        let err = reg.join(&u1, &RoomId::from("lobby")).unwrap_err();

        assert_eq!(err, RoomError::RoomNotFound("lobby".into()));
        assert_eq!(reg.room_of(&u1), Some(&general()));
        assert_eq!(reg.members(&general()), [u1]);
    }

    #[test]
    fn leave_only_affects_named_room() {
        let mut reg = registry();
        let u1 = UserId::from("u1");
        reg.join(&u1, &general()).unwrap();

        assert!(!reg.leave(&u1, &random()));
        assert_eq!(reg.room_of(&u1), Some(&general()));

        assert!(reg.leave(&u1, &general()));
        assert!(!reg.leave(&u1, &general()));
        assert_eq!(reg.room_of(&u1), None);
    }

    #[test]
    fn members_keep_join_order() {
        let mut reg = registry();
        for id in ["c", "a", "b"] {
            reg.join(&UserId::from(id), &general()).unwrap();
        }
        reg.leave_all(&UserId::from("a"));

        let ids: Vec<_> = reg.members(&general()).iter().map(UserId::as_str).collect();
        assert_eq!(ids, ["c", "b"]);
        assert_eq!(reg.active_room_count(), 1);
    }
}
