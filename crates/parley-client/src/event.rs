//! Client events and actions.

use parley_core::{ConnectionError, connection::ConnectionState};
use parley_proto::{
    ConversationId, Frame, MessageId, UserId,
    payloads::chat::{ChatMessage, MessageKind},
};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Reporting transport lifecycle (opened, failed, closed)
/// - Receiving frames from the network
/// - Driving time forward via ticks so typing bursts expire
/// - Forwarding UI intents (enter, type, send, read)
///
/// Generic over `I` (Instant type) so production and simulated clocks share
/// one client.
#[derive(Debug, Clone)]
pub enum ClientEvent<I> {
    /// Transport for `attempt` is open.
    TransportOpened {
        /// Attempt from [`ConnectStep::Open`](parley_core::connection::ConnectStep)
        attempt: u64,
    },

    /// Transport for `attempt` could not be opened.
    TransportFailed {
        /// Failed attempt
        attempt: u64,
        /// Why
        error: ConnectionError,
    },

    /// Live transport for `attempt` dropped.
    TransportClosed {
        /// Attempt that owned the transport
        attempt: u64,
        /// Human-readable cause, for logs
        reason: String,
    },

    /// User asked to disconnect.
    Disconnect,

    /// Frame received from server.
    FrameReceived(Frame),

    /// Time tick for typing expiry.
    Tick {
        /// Current time from the environment
        now: I,
    },

    /// A view for the conversation became visible.
    Enter {
        /// Conversation to join
        conversation_id: ConversationId,
    },

    /// The view for the conversation went away.
    Exit {
        /// Conversation to leave
        conversation_id: ConversationId,
    },

    /// Compose box contents changed.
    TextChanged {
        /// Conversation being typed in
        conversation_id: ConversationId,
        /// Whether the compose box holds any text
        has_content: bool,
        /// Current time from the environment
        now: I,
    },

    /// User submitted a message.
    Send(Draft),

    /// User saw a message.
    MarkRead {
        /// Conversation containing the message
        conversation_id: ConversationId,
        /// Message that was read
        message_id: MessageId,
    },

    /// History fetched from the durable backend.
    Backfill(Vec<ChatMessage>),

    /// Drop every piece of session state.
    Logout,
}

/// Message composed by the user, before it gets an id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    /// Target conversation
    pub conversation_id: ConversationId,
    /// Other participant
    pub receiver_id: UserId,
    /// Content, interpreted according to `kind`
    pub content: String,
    /// Content kind
    pub kind: MessageKind,
}

impl Draft {
    /// Text message draft.
    pub fn text(conversation_id: impl Into<ConversationId>, receiver_id: impl Into<UserId>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            receiver_id: receiver_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
        }
    }

    /// Image message draft; `url` must be http(s).
    pub fn image(conversation_id: impl Into<ConversationId>, receiver_id: impl Into<UserId>, url: impl Into<String>) -> Self {
        Self { kind: MessageKind::Image, ..Self::text(conversation_id, receiver_id, url) }
    }

    /// Location message draft.
    pub fn location(
        conversation_id: impl Into<ConversationId>,
        receiver_id: impl Into<UserId>,
        at: parley_core::validate::Coordinates,
    ) -> Self {
        Self { kind: MessageKind::Location, ..Self::text(conversation_id, receiver_id, at.to_string()) }
    }
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send a frame to the server, in order.
    Send(Frame),

    /// Connection state changed.
    ConnectionChanged(ConnectionState),

    /// Messages, typing peers or read state of a conversation changed.
    ConversationChanged {
        /// Conversation to re-render
        conversation_id: ConversationId,
    },

    /// A peer went online or offline.
    PresenceChanged {
        /// Peer
        user_id: UserId,
        /// New state
        online: bool,
    },

    /// Connection dropped while conversations are open; reconnect.
    Reconnect,
}
