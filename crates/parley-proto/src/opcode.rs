//! Frame opcodes.
//!
//! Every realtime event has exactly one opcode. Session frames (`0x00xx`)
//! belong to the transport handshake, client events (`0x01xx`) flow towards the
//! server, and server events (`0x02xx`) flow towards the client. `Typing` is
//! used in both directions.

use crate::errors::ProtocolError;

/// Operation code carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Transport handshake carrying the local identity
    Hello = 0x0001,
    /// Server acceptance of a `Hello`
    HelloReply = 0x0002,
    /// Graceful disconnect
    Goodbye = 0x0003,

    /// Start receiving traffic for a conversation
    JoinConversation = 0x0101,
    /// Stop receiving traffic for a conversation
    LeaveConversation = 0x0102,
    /// Outbound chat message
    SendMessage = 0x0103,
    /// Typing indicator (both directions)
    Typing = 0x0104,
    /// Local user read a message
    MarkAsRead = 0x0105,

    /// Inbound chat message
    NewMessage = 0x0201,
    /// Peer went online or offline
    UserStatusChange = 0x0202,
    /// A participant read a message
    MessageRead = 0x0203,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a raw wire value. `None` for unknown opcodes.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Hello),
            0x0002 => Some(Self::HelloReply),
            0x0003 => Some(Self::Goodbye),
            0x0101 => Some(Self::JoinConversation),
            0x0102 => Some(Self::LeaveConversation),
            0x0103 => Some(Self::SendMessage),
            0x0104 => Some(Self::Typing),
            0x0105 => Some(Self::MarkAsRead),
            0x0201 => Some(Self::NewMessage),
            0x0202 => Some(Self::UserStatusChange),
            0x0203 => Some(Self::MessageRead),
            _ => None,
        }
    }

    /// Socket event name used by the realtime channel.
    #[must_use]
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::HelloReply => "hello_reply",
            Self::Goodbye => "goodbye",
            Self::JoinConversation => "join_conversation",
            Self::LeaveConversation => "leave_conversation",
            Self::SendMessage => "send_message",
            Self::Typing => "typing",
            Self::MarkAsRead => "mark_as_read",
            Self::NewMessage => "new_message",
            Self::UserStatusChange => "user_status_change",
            Self::MessageRead => "message_read",
        }
    }

    /// True for events the server pushes to clients.
    #[must_use]
    pub const fn is_inbound(self) -> bool {
        matches!(
            self,
            Self::HelloReply
                | Self::Goodbye
                | Self::Typing
                | Self::NewMessage
                | Self::UserStatusChange
                | Self::MessageRead
        )
    }
}

impl TryFrom<u16> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_u16(value).ok_or(ProtocolError::UnknownOpcode(value))
    }
}
