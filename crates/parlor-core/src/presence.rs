//! Presence directory.
//!
//! Source of truth for who is online. Keeps one record per user id across
//! disconnects so a returning identity is recognized, and maintains a
//! session → user reverse index so transport events can be attributed.
//!
//! # Invariants
//!
//! - A user is connected iff it holds a connection reference. `connected()`
//!   is derived from the reference, so the two cannot disagree.
//! - At most one live session per user id. Registering again supersedes the
//!   previous session.
//! - The reverse index contains exactly the live sessions.

use std::{
    collections::{HashMap, VecDeque},
    ops::Sub,
    time::Duration,
};

use parlor_proto::{RoomId, UserId, payloads::records::UserSummary};

use crate::identity::Identity;

/// Runtime-assigned connection id.
pub type SessionId = u64;

/// Presence record for one user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User<I> {
    user_id: UserId,
    username: String,
    connection: Option<SessionId>,
    last_seen: I,
    last_seen_ms: u64,
    current_room: Option<RoomId>,
    last_room: Option<RoomId>,
}

impl<I: Copy> User<I> {
    /// Stable id.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Display name from the latest claim.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Online status, derived from the connection reference.
    pub fn connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Live session, if any.
    pub fn connection(&self) -> Option<SessionId> {
        self.connection
    }

    /// Monotonic time of the last connect or disconnect.
    pub fn last_seen(&self) -> I {
        self.last_seen
    }

    /// Wall-clock time of the last connect or disconnect, Unix millis.
    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }

    /// Room the user occupies while connected.
    pub fn current_room(&self) -> Option<&RoomId> {
        self.current_room.as_ref()
    }

    /// Room the user occupied when last disconnected.
    pub fn last_room(&self) -> Option<&RoomId> {
        self.last_room.as_ref()
    }

    /// Wire view.
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            connected: self.connected(),
            last_seen_ms: self.last_seen_ms,
            current_room: self.current_room.clone(),
        }
    }
}

/// Result of [`PresenceDirectory::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Identity never seen (or expired); new record created
    Joined,
    /// Known identity was offline and is back
    Reconnected,
    /// Known identity was online on another session, which lost ownership
    Superseded {
        /// Session that no longer owns the identity
        previous: SessionId,
    },
}

/// Directory of users keyed by id.
#[derive(Debug)]
pub struct PresenceDirectory<I> {
    users: HashMap<UserId, User<I>>,
    /// First-connection order for snapshots
    order: Vec<UserId>,
    /// Live session → owning user
    sessions: HashMap<SessionId, UserId>,
    /// Disconnect times, oldest first; stale entries skipped on expiry
    expiry: VecDeque<(I, UserId)>,
}

impl<I> Default for PresenceDirectory<I> {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            order: Vec::new(),
            sessions: HashMap::new(),
            expiry: VecDeque::new(),
        }
    }
}

impl<I> PresenceDirectory<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `session_id`.
    ///
    /// Never duplicates a record. The display name is refreshed from the
    /// latest claim.
    pub fn register(
        &mut self,
        identity: Identity,
        session_id: SessionId,
        now: I,
        now_ms: u64,
    ) -> (&User<I>, RegisterOutcome) {
        let Identity { user_id, username } = identity;

        let outcome = if let Some(user) = self.users.get_mut(&user_id) {
            let outcome = match user.connection.replace(session_id) {
                Some(previous) => {
                    self.sessions.remove(&previous);
                    RegisterOutcome::Superseded { previous }
                },
                None => RegisterOutcome::Reconnected,
            };
            user.username = username;
            user.last_seen = now;
            user.last_seen_ms = now_ms;
            outcome
        } else {
            self.order.push(user_id.clone());
            self.users.insert(user_id.clone(), User {
                user_id: user_id.clone(),
                username,
                connection: Some(session_id),
                last_seen: now,
                last_seen_ms: now_ms,
                current_room: None,
                last_room: None,
            });
            RegisterOutcome::Joined
        };

        self.sessions.insert(session_id, user_id.clone());

        debug_assert!(self.users.get(&user_id).is_some_and(User::connected));
        let user = &self.users[&user_id];
        (user, outcome)
    }

    /// Mark a user offline. Idempotent: an already offline user is untouched.
    ///
    /// Clears the current room (remembered as the last room) and queues the
    /// record for grace-window expiry. Returns `true` if the user was online.
    pub fn mark_disconnected(&mut self, user_id: &UserId, now: I, now_ms: u64) -> bool {
        let Some(user) = self.users.get_mut(user_id) else {
            return false;
        };
        let Some(session_id) = user.connection.take() else {
            return false;
        };

        self.sessions.remove(&session_id);
        user.last_seen = now;
        user.last_seen_ms = now_ms;
        user.last_room = user.current_room.take();
        self.expiry.push_back((now, user_id.clone()));
        true
    }

    /// User owning a live session.
    pub fn user_for_session(&self, session_id: SessionId) -> Option<&User<I>> {
        self.sessions.get(&session_id).and_then(|user_id| self.users.get(user_id))
    }

    /// Presence record for a user id.
    pub fn user(&self, user_id: &UserId) -> Option<&User<I>> {
        self.users.get(user_id)
    }

    /// Live session of a user. `None` if offline or unknown.
    pub fn connection_of(&self, user_id: &UserId) -> Option<SessionId> {
        self.users.get(user_id).and_then(|u| u.connection)
    }

    /// Record the room a connected user occupies.
    ///
    /// Ignored for offline or unknown users.
    pub fn set_current_room(&mut self, user_id: &UserId, room_id: Option<RoomId>) {
        if let Some(user) = self.users.get_mut(user_id).filter(|u| u.connected()) {
            user.current_room = room_id;
        }
    }

    /// Every record in first-connection order.
    pub fn snapshot(&self) -> impl Iterator<Item = &User<I>> + '_ {
        self.order.iter().filter_map(|id| self.users.get(id))
    }

    /// Connected users in first-connection order.
    pub fn connected_users(&self) -> impl Iterator<Item = &User<I>> + '_ {
        self.snapshot().filter(|u| u.connected())
    }

    /// Number of connected users.
    pub fn connected_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of records, online or not.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// No records at all.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Evict records that have been offline for at least `grace`.
    ///
    /// Queue entries left behind by users who reconnected (or disconnected
    /// again later) no longer match the record's `last_seen` and are
    /// discarded. Returns evicted ids in disconnect order.
    pub fn expire_disconnected(&mut self, now: I, grace: Duration) -> Vec<UserId> {
        let mut evicted = Vec::new();

        while let Some((disconnected_at, _)) = self.expiry.front() {
            if now - *disconnected_at < grace {
                break;
            }
            let Some((disconnected_at, user_id)) = self.expiry.pop_front() else {
                break;
            };

            let stale = self
                .users
                .get(&user_id)
                .is_none_or(|u| u.connected() || u.last_seen != disconnected_at);
            if stale {
                continue;
            }

            self.users.remove(&user_id);
            evicted.push(user_id);
        }

        if !evicted.is_empty() {
            self.order.retain(|id| self.users.contains_key(id));
            tracing::debug!(count = evicted.len(), "expired disconnected users");
        }

        evicted
    }
}
