//! Operation codes carried in the frame header.
//!
//! Ranges:
//! - `0x00xx` session management
//! - `0x01xx` client requests
//! - `0x02xx` server events

/// Frame operation code.
///
/// Each opcode identifies exactly one [`crate::Payload`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Opcode {
    /// Connection handshake carrying the identity claim
    Hello = 0x0001,
    /// Graceful disconnect
    Goodbye = 0x0002,

    /// Switch to another room
    JoinRoom = 0x0101,
    /// Post a message to a room
    SendMessage = 0x0102,
    /// User started typing
    TypingStart = 0x0103,
    /// User stopped typing
    TypingStop = 0x0104,
    /// React to a message
    ReactToMessage = 0x0105,
    /// Acknowledge reading a message
    MarkMessageRead = 0x0106,
    /// Direct message to one user
    SendPrivateMessage = 0x0107,

    /// Directory snapshot
    UsersList = 0x0201,
    /// Room catalogue
    RoomsList = 0x0202,
    /// Room joined, with full history
    RoomJoined = 0x0203,
    /// Message appended to a room
    NewMessage = 0x0204,
    /// First connection of a user
    UserConnected = 0x0205,
    /// User went offline
    UserDisconnected = 0x0206,
    /// Known user came back
    UserReconnected = 0x0207,
    /// Someone entered the room
    UserJoinedRoom = 0x0208,
    /// Someone left the room
    UserLeftRoom = 0x0209,
    /// Typing indicator on
    UserTyping = 0x020A,
    /// Typing indicator off
    UserStopTyping = 0x020B,
    /// Reactions on a message changed
    MessageReacted = 0x020C,
    /// Someone read a message
    MessageRead = 0x020D,
    /// Incoming direct message
    PrivateMessage = 0x020E,
    /// Delivery acknowledgement for an outgoing direct message
    PrivateMessageSent = 0x020F,
    /// Lightweight activity notice
    Notification = 0x0210,
    /// Error report for the originating request
    Error = 0x02FF,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw wire value. `None` if unassigned.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0001 => Self::Hello,
            0x0002 => Self::Goodbye,
            0x0101 => Self::JoinRoom,
            0x0102 => Self::SendMessage,
            0x0103 => Self::TypingStart,
            0x0104 => Self::TypingStop,
            0x0105 => Self::ReactToMessage,
            0x0106 => Self::MarkMessageRead,
            0x0107 => Self::SendPrivateMessage,
            0x0201 => Self::UsersList,
            0x0202 => Self::RoomsList,
            0x0203 => Self::RoomJoined,
            0x0204 => Self::NewMessage,
            0x0205 => Self::UserConnected,
            0x0206 => Self::UserDisconnected,
            0x0207 => Self::UserReconnected,
            0x0208 => Self::UserJoinedRoom,
            0x0209 => Self::UserLeftRoom,
            0x020A => Self::UserTyping,
            0x020B => Self::UserStopTyping,
            0x020C => Self::MessageReacted,
            0x020D => Self::MessageRead,
            0x020E => Self::PrivateMessage,
            0x020F => Self::PrivateMessageSent,
            0x0210 => Self::Notification,
            0x02FF => Self::Error,
            _ => return None,
        })
    }

    /// Session-layer opcode (`Hello`, `Goodbye`).
    #[must_use]
    pub const fn is_session(self) -> bool {
        self.to_u16() >> 8 == 0x00
    }

    /// Opcode a client may send after the handshake.
    #[must_use]
    pub const fn is_request(self) -> bool {
        self.to_u16() >> 8 == 0x01
    }

    /// Opcode only the server emits.
    #[must_use]
    pub const fn is_event(self) -> bool {
        self.to_u16() >> 8 == 0x02
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Opcode; 26] = [
        Opcode::Hello,
        Opcode::Goodbye,
        Opcode::JoinRoom,
        Opcode::SendMessage,
        Opcode::TypingStart,
        Opcode::TypingStop,
        Opcode::ReactToMessage,
        Opcode::MarkMessageRead,
        Opcode::SendPrivateMessage,
        Opcode::UsersList,
        Opcode::RoomsList,
        Opcode::RoomJoined,
        Opcode::NewMessage,
        Opcode::UserConnected,
        Opcode::UserDisconnected,
        Opcode::UserReconnected,
        Opcode::UserJoinedRoom,
        Opcode::UserLeftRoom,
        Opcode::UserTyping,
        Opcode::UserStopTyping,
        Opcode::MessageReacted,
        Opcode::MessageRead,
        Opcode::PrivateMessage,
        Opcode::PrivateMessageSent,
        Opcode::Notification,
        Opcode::Error,
    ];

    #[test]
    fn every_opcode_parses_back() {
        for opcode in ALL {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }
    }

    #[test]
    fn ranges_are_disjoint() {
        for opcode in ALL {
            let classes =
                [opcode.is_session(), opcode.is_request(), opcode.is_event()].iter().filter(|c| **c).count();
            assert_eq!(classes, 1, "{opcode:?} must belong to exactly one range");
        }
    }

    #[test]
    fn unassigned_values_rejected() {
        assert_eq!(Opcode::from_u16(0x0000), None);
        assert_eq!(Opcode::from_u16(0x0108), None);
        assert_eq!(Opcode::from_u16(0xFFFF), None);
    }
}
