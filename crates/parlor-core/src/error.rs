//! Error types for the Parlor engine.
//!
//! Component errors ([`RoomError`], [`LogError`], [`SessionError`]) stay
//! close to the component that raises them. [`EngineError`] is the taxonomy
//! reported to clients: every variant becomes an `error` event for the
//! originating connection and none of them is fatal to the engine.

use parlor_proto::{ErrorPayload, MessageId, ProtocolError, RoomId, UserId};
use thiserror::Error;

use crate::{message_log::LogError, rooms::RoomError, session::SessionState};

/// Errors raised by the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Transition not allowed from the current state
    #[error("invalid session transition: cannot {operation} from {state:?}")]
    InvalidTransition {
        /// State when the transition was attempted
        state: SessionState,
        /// Attempted operation
        operation: &'static str,
    },
}

/// Client-visible failure of a single operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Room id not in the registry
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

    /// Unicast target offline or unknown
    #[error("user not available: {0}")]
    UserUnavailable(UserId),

    /// Request undecodable or not valid in the connection's state
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Unexpected fault; details stay in the server log
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Wire error code.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::RoomNotFound(_) => ErrorPayload::ROOM_NOT_FOUND,
            Self::MessageNotFound { .. } => ErrorPayload::MESSAGE_NOT_FOUND,
            Self::UserUnavailable(_) => ErrorPayload::USER_UNAVAILABLE,
            Self::MalformedRequest(_) => ErrorPayload::MALFORMED_REQUEST,
            Self::Internal(_) => ErrorPayload::INTERNAL,
        }
    }

    /// Error payload for the originating connection.
    ///
    /// Internal errors are reported opaquely.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::RoomNotFound(room_id) => ErrorPayload::room_not_found(room_id),
            Self::MessageNotFound { message_id, room_id } => {
                ErrorPayload::message_not_found(message_id, room_id)
            },
            Self::UserUnavailable(user_id) => ErrorPayload::user_unavailable(user_id),
            Self::MalformedRequest(reason) => ErrorPayload::malformed(reason.clone()),
            Self::Internal(_) => ErrorPayload::internal(),
        }
    }
}

impl From<RoomError> for EngineError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::RoomNotFound(room_id) => Self::RoomNotFound(room_id),
            RoomError::DuplicateRoom(_) | RoomError::NoRooms => Self::Internal(err.to_string()),
        }
    }
}

impl From<LogError> for EngineError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::RoomNotFound(room_id) => Self::RoomNotFound(room_id),
            LogError::MessageNotFound { message_id, room_id } => {
                Self::MessageNotFound { message_id, room_id }
            },
        }
    }
}

impl From<ProtocolError> for EngineError {
    fn from(err: ProtocolError) -> Self {
        Self::MalformedRequest(err.to_string())
    }
}

impl From<SessionError> for EngineError {
    fn from(err: SessionError) -> Self {
        Self::MalformedRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_constants() {
        assert_eq!(EngineError::RoomNotFound("x".into()).code(), ErrorPayload::ROOM_NOT_FOUND);
        assert_eq!(
            EngineError::UserUnavailable("u".into()).code(),
            ErrorPayload::USER_UNAVAILABLE
        );
        assert_eq!(EngineError::Internal("boom".into()).code(), ErrorPayload::INTERNAL);
    }

    #[test]
    fn internal_details_not_leaked() {
        let payload = EngineError::Internal("poisoned index 7".into()).to_payload();
        insta::assert_snapshot!(payload.message, @"Internal server error");
    }

    #[test]
    fn display_texts() {
        let err = EngineError::MessageNotFound {
            message_id: MessageId::from("m1"),
            room_id: RoomId::from("general"),
        };
        insta::assert_snapshot!(err.to_string(), @"message m1 not found in room general");

        let err = SessionError::InvalidTransition {
            state: SessionState::Connecting,
            operation: "join_room",
        };
        insta::assert_snapshot!(
            err.to_string(),
            @"invalid session transition: cannot join_room from Connecting"
        );
    }

    #[test]
    fn log_errors_map_to_taxonomy() {
        let err: EngineError = LogError::RoomNotFound(RoomId::from("nope")).into();
        assert_eq!(err, EngineError::RoomNotFound(RoomId::from("nope")));
    }
}
