//! Broadcast audience resolution.
//!
//! Turns an [`Audience`] into the concrete sessions that should receive an
//! event. Resolution is a pure read of presence and room membership; the
//! driver pairs the result with an encoded frame.
//!
//! # Invariants
//!
//! - Each recipient appears at most once.
//! - Order is stable: room members in join order, global audiences in
//!   directory order, an echoed originator last if not a member.
//! - Only connected users are ever addressed.

use std::{ops::Sub, time::Duration};

use parlor_proto::{RoomId, UserId};

use crate::{
    error::EngineError,
    presence::{PresenceDirectory, SessionId},
    rooms::RoomRegistry,
};

/// Who should receive an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Members of a room.
    Room {
        /// Target room
        room_id: RoomId,
        /// User whose action produced the event
        origin: UserId,
        /// Deliver to the originator too (even if not a member)
        echo: bool,
    },
    /// One user, wherever they are connected.
    User(UserId),
    /// Every connected user.
    Everyone {
        /// Subject of the event, skipped
        except: Option<UserId>,
    },
}

impl Audience {
    /// Room members including the originator.
    pub fn room_with_echo(room_id: RoomId, origin: UserId) -> Self {
        Self::Room { room_id, origin, echo: true }
    }

    /// Room members except the originator.
    pub fn room_except(room_id: RoomId, origin: UserId) -> Self {
        Self::Room { room_id, origin, echo: false }
    }
}

/// Sessions addressed by `audience`.
///
/// # Errors
///
/// - `EngineError::UserUnavailable` for [`Audience::User`] when the target is
///   offline or unknown
pub fn resolve<I>(
    audience: &Audience,
    presence: &PresenceDirectory<I>,
    rooms: &RoomRegistry,
) -> Result<Vec<SessionId>, EngineError>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    match audience {
        Audience::Room { room_id, origin, echo } => {
            let mut sessions: Vec<SessionId> = rooms
                .members(room_id)
                .iter()
                .filter(|member| *echo || *member != origin)
                .filter_map(|member| presence.connection_of(member))
                .collect();

            if *echo {
                if let Some(session) = presence.connection_of(origin) {
                    if !sessions.contains(&session) {
                        sessions.push(session);
                    }
                }
            }
            Ok(sessions)
        },
        Audience::User(user_id) => presence
            .connection_of(user_id)
            .map(|session| vec![session])
            .ok_or_else(|| EngineError::UserUnavailable(user_id.clone())),
        Audience::Everyone { except } => Ok(presence
            .connected_users()
            .filter(|user| except.as_ref() != Some(user.user_id()))
            .filter_map(|user| user.connection())
            .collect()),
    }
}
