//! Driver and executor error types.
//!
//! Client-caused failures never surface here: the driver turns them into
//! `error` events for the originating connection. These errors describe
//! runtime misuse (events for sessions the driver never saw), invalid
//! configuration, and delivery problems.

use parlor_core::{RoomError, SessionId};

/// Errors returned by [`crate::ServerDriver`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// Event refers to a session the driver does not know.
    ///
    /// The runtime delivered a frame before `ConnectionAccepted` or after
    /// the session was closed. The frame is dropped.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// `ConnectionAccepted` repeated a live session id.
    ///
    /// Session ids must be unique; this is a runtime bug.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    /// Configuration rejected at construction.
    ///
    /// Duplicate or missing rooms, or a default room that is not
    /// configured. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Outbound frame could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<RoomError> for DriverError {
    fn from(err: RoomError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<parlor_proto::ProtocolError> for DriverError {
    fn from(err: parlor_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors from delivering frames to connected sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Session's outbound queue is at capacity.
    ///
    /// The peer is not draining its stream. What happens next depends on the
    /// broadcast policy.
    #[error("outbound queue full for session {0}")]
    QueueFull(SessionId),

    /// Session has no outbound queue or its writer has exited.
    ///
    /// Usually a race with disconnect; the frame is dropped.
    #[error("send failed for session {session_id}: {reason}")]
    SendFailed {
        /// Target session
        session_id: SessionId,
        /// Error message
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display() {
        let err = DriverError::SessionNotFound(42);
        assert_eq!(err.to_string(), "session not found: 42");

        let err: DriverError = RoomError::NoRooms.into();
        insta::assert_snapshot!(
            err.to_string(),
            @"invalid configuration: at least one room must be configured"
        );
    }

    #[test]
    fn executor_error_display() {
        let err = ExecutorError::QueueFull(7);
        assert_eq!(err.to_string(), "outbound queue full for session 7");

        let err = ExecutorError::SendFailed { session_id: 42, reason: "closed".to_string() };
        assert_eq!(err.to_string(), "send failed for session 42: closed");
    }
}
