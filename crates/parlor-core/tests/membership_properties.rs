//! Property tests over presence and room membership together.
//!
//! These tests verify critical invariants:
//! - A user id is a member of at most one room after any operation sequence
//! - A user is connected iff it owns a live session
//! - Failed joins never change membership

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parlor_core::{Identity, PresenceDirectory, RoomRegistry, RoomSpec};
use parlor_proto::{RoomId, UserId};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Connect { user: u8 },
    Disconnect { user: u8 },
    Join { user: u8, room: u8 },
    Leave { user: u8, room: u8 },
    Expire { advance_secs: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..6).prop_map(|user| Op::Connect { user }),
        2 => (0u8..6).prop_map(|user| Op::Disconnect { user }),
        4 => (0u8..6, 0u8..4).prop_map(|(user, room)| Op::Join { user, room }),
        1 => (0u8..6, 0u8..4).prop_map(|(user, room)| Op::Leave { user, room }),
        1 => (0u8..60).prop_map(|advance_secs| Op::Expire { advance_secs }),
    ]
}

fn user_id(n: u8) -> UserId {
    UserId::new(format!("u{n}"))
}

/// Rooms 0..3 exist, room 3 does not.
fn room_id(n: u8) -> RoomId {
    match n {
        0 => RoomId::from("general"),
        1 => RoomId::from("random"),
        2 => RoomId::from("lobby"),
        _ => RoomId::from("nowhere"),
    }
}

fn registry() -> RoomRegistry {
    let mut specs = RoomSpec::defaults();
    specs.push(RoomSpec::new("lobby", "Lobby", "Waiting area"));
    RoomRegistry::new(specs).unwrap()
}

proptest! {
    #[test]
    fn membership_stays_exclusive(ops in prop::collection::vec(op(), 1..128)) {
        let mut presence = PresenceDirectory::new();
        let mut rooms = registry();
        let mut now = Instant::now();
        let mut next_session = 1u64;
        let grace = Duration::from_secs(30);

        for op in ops {
            match op {
                Op::Connect { user } => {
                    let identity = Identity { user_id: user_id(user), username: format!("User{user}") };
                    presence.register(identity, next_session, now, 0);
                    next_session += 1;
                },
                Op::Disconnect { user } => {
                    if presence.mark_disconnected(&user_id(user), now, 0) {
                        rooms.leave_all(&user_id(user));
                    }
                },
                Op::Join { user, room } => {
                    let before = rooms.room_of(&user_id(user)).cloned();
                    match rooms.join(&user_id(user), &room_id(room)) {
                        Ok(_) => prop_assert_eq!(rooms.room_of(&user_id(user)).cloned(), Some(room_id(room))),
                        Err(_) => prop_assert_eq!(rooms.room_of(&user_id(user)).cloned(), before),
                    }
                },
                Op::Leave { user, room } => {
                    rooms.leave(&user_id(user), &room_id(room));
                },
                Op::Expire { advance_secs } => {
                    now += Duration::from_secs(u64::from(advance_secs));
                    presence.expire_disconnected(now, grace);
                },
            }

            let mut seen: HashMap<UserId, RoomId> = HashMap::new();
            for room in rooms.list_rooms() {
                for member in room.members() {
                    let previous = seen.insert(member.clone(), room.id().clone());
                    prop_assert!(previous.is_none(), "{} in two rooms", member);
                    prop_assert_eq!(rooms.room_of(member), Some(room.id()));
                }
            }

            for user in presence.snapshot() {
                prop_assert_eq!(user.connected(), user.connection().is_some());
                if let Some(session) = user.connection() {
                    prop_assert_eq!(
                        presence.user_for_session(session).map(|u| u.user_id()),
                        Some(user.user_id())
                    );
                }
            }
            prop_assert_eq!(presence.connected_count(), presence.connected_users().count());
        }
    }
}
