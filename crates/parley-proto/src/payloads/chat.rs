//! Conversation payloads: membership, messages, typing and read receipts.

use serde::{Deserialize, Serialize};

use crate::{ConversationId, MessageId, UserId};

/// Room membership request (`join_conversation` / `leave_conversation`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    /// Conversation to join or leave
    pub conversation_id: ConversationId,
}

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text
    Text,
    /// Image URL
    Image,
    /// `"<lat>,<lng>"` coordinates
    Location,
}

/// Chat message as carried by `send_message` and `new_message`.
///
/// The `id` is generated by the sending client and echoed unchanged by the
/// server, so the sender can reconcile its optimistic copy with the delivered
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message identifier (client-generated idempotency key)
    pub id: MessageId,
    /// Conversation the message belongs to
    pub conversation_id: ConversationId,
    /// Author
    pub sender_id: UserId,
    /// Addressee in a 1:1 conversation
    pub receiver_id: UserId,
    /// Payload, interpreted according to `kind`
    pub content: String,
    /// Payload kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Creation time in Unix milliseconds
    pub timestamp: u64,
}

/// Typing indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    /// Who is (or stopped) typing
    pub user_id: UserId,
    /// Conversation being typed in
    pub conversation_id: ConversationId,
    /// `true` on burst start, `false` on burst end
    pub is_typing: bool,
}

/// Local user read a message (`mark_as_read`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsRead {
    /// Conversation containing the message
    pub conversation_id: ConversationId,
    /// Message that was read
    pub message_id: MessageId,
    /// Reader
    pub user_id: UserId,
}

/// A participant read a message (`message_read`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    /// Conversation containing the message
    pub conversation_id: ConversationId,
    /// Message that was read
    pub message_id: MessageId,
    /// Reader
    pub read_by: UserId,
}
