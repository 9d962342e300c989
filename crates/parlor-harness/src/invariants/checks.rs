//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashMap;

use parlor_core::SessionState;

use super::{Invariant, InvariantResult, SystemSnapshot, TransitionInvariant, Violation};

/// `connected` is true exactly when a connection reference is held.
pub struct PresenceConsistency;

impl Invariant for PresenceConsistency {
    fn name(&self) -> &'static str {
        "presence_consistency"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for user in &state.users {
            if user.connected != user.connection.is_some() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "user {}: connected={} but connection={:?}",
                        user.user_id, user.connected, user.connection
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A held connection reference points at a live, active session.
///
/// A stale reference would route events to a closed connection.
pub struct LiveConnections;

impl Invariant for LiveConnections {
    fn name(&self) -> &'static str {
        "live_connections"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for user in &state.users {
            let Some(session_id) = user.connection else {
                continue;
            };
            if user.connection_state != Some(SessionState::Active) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "user {} holds session {} in state {:?}",
                        user.user_id, session_id, user.connection_state
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A user id appears in at most one room's member list, at most once.
pub struct ExclusiveMembership;

impl Invariant for ExclusiveMembership {
    fn name(&self) -> &'static str {
        "exclusive_membership"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut seen = HashMap::new();
        for room in &state.rooms {
            for member in &room.members {
                if let Some(other) = seen.insert(member, &room.room_id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "user {member} is a member of both {other} and {}",
                            room.room_id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Room members are online, and presence names the room they are in.
///
/// Offline users must have been removed from every room.
pub struct MembersOnline;

impl Invariant for MembersOnline {
    fn name(&self) -> &'static str {
        "members_online"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            for member in &room.members {
                let user = state.user(member);
                let online = user.is_some_and(|u| u.connected);
                let recorded = user.and_then(|u| u.current_room.as_ref());
                if !online || recorded != Some(&room.room_id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "member {member} of {}: online={online}, presence room={recorded:?}",
                            room.room_id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Log indices are 0, 1, 2, ... and timestamps never go backwards.
pub struct LogContiguity;

impl Invariant for LogContiguity {
    fn name(&self) -> &'static str {
        "log_contiguity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            for (position, message) in room.messages.iter().enumerate() {
                if message.log_index != position as u64 {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {} position {position} has log_index {}",
                            room.room_id, message.log_index
                        ),
                    });
                }
            }
            for pair in room.messages.windows(2) {
                if pair[1].sent_at_ms < pair[0].sent_at_ms {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {} timestamp went back at index {}",
                            room.room_id, pair[1].log_index
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every message counts as read by its author.
pub struct AuthorHasRead;

impl Invariant for AuthorHasRead {
    fn name(&self) -> &'static str {
        "author_has_read"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for room in &state.rooms {
            if let Some(message) = room.messages.iter().find(|m| !m.read_by.contains(&m.author_id)) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "room {} index {}: author {} missing from read_by",
                        room.room_id, message.log_index, message.author_id
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Logs are append-only and read receipts only grow.
///
/// Between two snapshots, every earlier message is still present at the same
/// index with the same body, and its `read_by` is a superset.
pub struct AppendOnlyHistory;

impl TransitionInvariant for AppendOnlyHistory {
    fn name(&self) -> &'static str {
        "append_only_history"
    }

    fn check_transition(&self, before: &SystemSnapshot, after: &SystemSnapshot) -> InvariantResult {
        for old_room in &before.rooms {
            let Some(new_room) = after.room(&old_room.room_id) else {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("room {} disappeared", old_room.room_id),
                });
            };

            for old in &old_room.messages {
                let Some(new) = new_room.messages.get(old.log_index as usize) else {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {} lost message at index {}",
                            old_room.room_id, old.log_index
                        ),
                    });
                };
                if new.message_id != old.message_id || new.content != old.content {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {} index {} was rewritten",
                            old_room.room_id, old.log_index
                        ),
                    });
                }
                if !new.read_by.is_superset(&old.read_by) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {} index {}: read_by shrank from {:?} to {:?}",
                            old_room.room_id, old.log_index, old.read_by, new.read_by
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
