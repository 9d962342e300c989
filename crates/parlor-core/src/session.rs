//! Per-connection lifecycle state machine.
//!
//! Tracks where a single connection is in its lifecycle. Like the rest of the
//! engine it is pure: time is passed in, nothing is sent. The driver consults
//! the state before routing a request and advances it as the stores change.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐  Hello  ┌───────────────┐  join  ┌────────────┐
//! │ Connecting │────────>│ Authenticated │───────>│ Active(r)  │──┐ join_room
//! └────────────┘         └───────────────┘        └────────────┘<─┘
//!       │                        │                  │        │
//!       │ close/timeout          │ close            │ close  │ superseded
//!       ↓                        ↓                  ↓        ↓
//!  ┌────────────┐          ┌────────────┐    ┌──────────────┐ ┌────────────┐
//!  │ Terminated │          │ Terminated │    │ Disconnected │ │ Terminated │
//!  └────────────┘          └────────────┘    └──────────────┘ └────────────┘
//! ```
//!
//! `Disconnected` means presence was updated for the user; `Terminated` means
//! the connection ended without owning presence.

use std::{ops::Sub, time::Duration};

use parlor_proto::{RoomId, UserId};

use crate::{error::SessionError, presence::SessionId};

/// Time allowed between connecting and sending `Hello`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport open, no `Hello` yet
    Connecting,
    /// Identity resolved, not yet placed in a room
    Authenticated,
    /// Registered in presence and a member of a room
    Active,
    /// Closed after being active; presence shows the user offline
    Disconnected,
    /// Closed without owning presence
    Terminated,
}

impl SessionState {
    /// No further transitions possible.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Disconnected | Self::Terminated)
    }
}

/// Lifecycle of one connection.
#[derive(Debug, Clone)]
pub struct Session<I> {
    session_id: SessionId,
    state: SessionState,
    opened_at: I,
    user_id: Option<UserId>,
    room_id: Option<RoomId>,
}

impl<I> Session<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// New connection in [`SessionState::Connecting`].
    pub fn new(session_id: SessionId, now: I) -> Self {
        Self { session_id, state: SessionState::Connecting, opened_at: now, user_id: None, room_id: None }
    }

    /// Runtime-assigned id.
    pub fn id(&self) -> SessionId {
        self.session_id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity bound by `Hello`.
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Room while active.
    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    /// Bind the resolved identity.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidTransition` unless `Connecting`
    pub fn authenticate(&mut self, user_id: UserId) -> Result<(), SessionError> {
        self.expect(SessionState::Connecting, "authenticate")?;
        self.user_id = Some(user_id);
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// Enter the first room.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidTransition` unless `Authenticated`
    pub fn activate(&mut self, room_id: RoomId) -> Result<(), SessionError> {
        self.expect(SessionState::Authenticated, "activate")?;
        self.room_id = Some(room_id);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Move to another room. Returns the room left.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidTransition` unless `Active`
    pub fn switch_room(&mut self, room_id: RoomId) -> Result<Option<RoomId>, SessionError> {
        self.expect(SessionState::Active, "switch_room")?;
        Ok(self.room_id.replace(room_id))
    }

    /// Identity of an active session, for request handling.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidTransition` unless `Active`
    pub fn require_active(&self, operation: &'static str) -> Result<&UserId, SessionError> {
        match (&self.state, &self.user_id) {
            (SessionState::Active, Some(user_id)) => Ok(user_id),
            _ => Err(SessionError::InvalidTransition { state: self.state, operation }),
        }
    }

    /// Close the connection.
    ///
    /// An active session becomes `Disconnected` and the caller must update
    /// presence; anything else becomes `Terminated`. Closing twice keeps the
    /// first outcome.
    pub fn close(&mut self) -> SessionState {
        self.state = match self.state {
            SessionState::Active => SessionState::Disconnected,
            SessionState::Disconnected => SessionState::Disconnected,
            SessionState::Connecting | SessionState::Authenticated | SessionState::Terminated => {
                SessionState::Terminated
            },
        };
        self.room_id = None;
        self.state
    }

    /// Identity was taken over by a newer connection.
    ///
    /// The session no longer owns presence, so a later close leaves the user
    /// alone.
    pub fn supersede(&mut self) {
        self.state = SessionState::Terminated;
        self.room_id = None;
    }

    /// Time spent in `Connecting`, if it exceeds `timeout`.
    pub fn check_handshake_timeout(&self, now: I, timeout: Duration) -> Option<Duration> {
        if self.state != SessionState::Connecting {
            return None;
        }
        let elapsed = now - self.opened_at;
        (elapsed > timeout).then_some(elapsed)
    }

    fn expect(&self, state: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition { state: self.state, operation })
        }
    }
}
