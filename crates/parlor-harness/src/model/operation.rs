//! Operations for model-based testing.
//!
//! Operations represent all possible client actions against the relay. They
//! are generated randomly by proptest and applied to both the model and the
//! real driver.

use arbitrary::Arbitrary;

/// Client identifier (0-indexed). Client `n` claims user id `u{n}`.
pub type ClientId = u8;

/// Room selector (uses u8 to keep test space manageable).
///
/// See [`ModelRoom::from_selector`] for the mapping onto configured rooms.
pub type ModelRoomId = u8;

/// Room names the model knows about.
pub const MODEL_ROOMS: [&str; 2] = ["general", "random"];

/// Name used for a room that is never configured.
pub const MISSING_ROOM: &str = "nowhere";

/// Reactions the generator picks from.
const REACTIONS: [&str; 4] = ["👍", "❤️", "😂", "🎉"];

/// A room as seen by an operation: configured, or deliberately unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRoom {
    /// Index into [`MODEL_ROOMS`]
    Configured(usize),
    /// A room id the server does not have
    Missing,
}

impl ModelRoom {
    /// Map a selector onto a room. One in three selectors names a missing room.
    pub fn from_selector(selector: ModelRoomId) -> Self {
        match selector as usize % (MODEL_ROOMS.len() + 1) {
            index if index < MODEL_ROOMS.len() => Self::Configured(index),
            _ => Self::Missing,
        }
    }

    /// Wire room id.
    pub fn name(self) -> &'static str {
        match self {
            Self::Configured(index) => MODEL_ROOMS[index],
            Self::Missing => MISSING_ROOM,
        }
    }
}

/// User id claimed by a client.
pub fn user_name(client_id: ClientId) -> String {
    format!("u{client_id}")
}

/// Operations that can be applied to the system.
///
/// Each operation targets a specific client. Operations are small and
/// composable so proptest can explore interesting interleavings.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Open a connection and say hello as the client's user.
    ///
    /// A client that is already connected takes over its own identity.
    Connect {
        /// Client connecting.
        client_id: ClientId,
    },

    /// Drop the client's connection from the transport side.
    Disconnect {
        /// Client disconnecting.
        client_id: ClientId,
    },

    /// Switch rooms.
    Join {
        /// Client switching.
        client_id: ClientId,
        /// Target room.
        room_id: ModelRoomId,
    },

    /// Post a message.
    Send {
        /// Author.
        client_id: ClientId,
        /// Target room.
        room_id: ModelRoomId,
        /// Message content (kept small for efficiency).
        content: SmallMessage,
    },

    /// React to a message by log position.
    React {
        /// Reacting client.
        client_id: ClientId,
        /// Room of the message.
        room_id: ModelRoomId,
        /// Log position; positions past the end name an unknown message.
        position: u8,
        /// Reaction selector.
        reaction: u8,
    },

    /// Mark a message read by log position.
    MarkRead {
        /// Reader.
        client_id: ClientId,
        /// Room of the message.
        room_id: ModelRoomId,
        /// Log position; positions past the end name an unknown message.
        position: u8,
    },

    /// Start or stop typing.
    Typing {
        /// Typist.
        client_id: ClientId,
        /// Room typed in.
        room_id: ModelRoomId,
        /// Start when true, stop otherwise.
        active: bool,
    },

    /// Direct message between clients.
    PrivateMessage {
        /// Sender.
        from: ClientId,
        /// Recipient.
        to: ClientId,
        /// Message content.
        content: SmallMessage,
    },

    /// Advance simulation time, then tick.
    ///
    /// Triggers grace-window expiry in both model and real system.
    AdvanceTime {
        /// Seconds to advance.
        seconds: u8,
    },
}

/// Small message content for testing.
///
/// Compact representation that keeps shrunk cases readable while still
/// exercising empty and multi-byte bodies. The content is deterministic.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallMessage {
    /// Message seed.
    pub seed: u8,
    /// Length hint (0-3 maps to empty/short/medium/unicode).
    pub size_class: u8,
}

impl SmallMessage {
    /// Expand to message text.
    pub fn to_text(&self) -> String {
        match self.size_class % 4 {
            0 => String::new(),
            1 => format!("m{}", self.seed),
            2 => format!("message {} ", self.seed).repeat(8),
            _ => format!("héllo wörld {}", self.seed),
        }
    }
}

/// Reaction symbol for a selector. Never empty.
pub fn reaction_for(selector: u8) -> &'static str {
    REACTIONS[selector as usize % REACTIONS.len()]
}

/// Result of applying an operation.
///
/// Used to compare model and real system behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation failed with expected error.
    Error(OperationError),
}

/// Expected errors that can occur during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Room not configured.
    RoomNotFound,

    /// Message position not in the room log.
    MessageNotFound,

    /// Direct message recipient offline or unknown.
    UserUnavailable,

    /// Client has no active connection.
    NotConnected,
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, OperationResult::Ok)
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_cover_missing_room() {
        assert_eq!(ModelRoom::from_selector(0), ModelRoom::Configured(0));
        assert_eq!(ModelRoom::from_selector(1).name(), "random");
        assert_eq!(ModelRoom::from_selector(2), ModelRoom::Missing);
        assert_eq!(ModelRoom::from_selector(5).name(), MISSING_ROOM);
    }

    #[test]
    fn reactions_are_never_blank() {
        for selector in 0..=u8::MAX {
            assert!(!reaction_for(selector).trim().is_empty());
        }
    }

    #[test]
    fn small_message_sizes() {
        assert!(SmallMessage { seed: 1, size_class: 0 }.to_text().is_empty());
        assert_eq!(SmallMessage { seed: 7, size_class: 1 }.to_text(), "m7");
        assert!(SmallMessage { seed: 7, size_class: 2 }.to_text().len() > 64);
    }
}
