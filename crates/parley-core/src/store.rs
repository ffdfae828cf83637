//! Message store.
//!
//! Conversation-partitioned log of every message observed during the session,
//! together with per-conversation typing peers and read receipts.
//!
//! # Ordering
//!
//! Within a conversation messages are kept in non-decreasing timestamp order.
//! Messages with equal timestamps keep arrival order: an insert lands after
//! every message with the same timestamp.
//!
//! # Deduplication
//!
//! Message ids are generated by the sending client and echoed by the server,
//! so a repeated id is always the same message. The one repeat that carries
//! information is the server echo of our own optimistic copy: it confirms
//! delivery and supplies the authoritative timestamp. Every other repeat is
//! dropped.

use std::collections::{BTreeSet, HashMap, HashSet};

use parley_proto::{ConversationId, MessageId, UserId, payloads::chat::{ChatMessage, MessageKind}};

/// Delivery progress of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Delivery {
    /// Local optimistic copy, not yet echoed by the server
    Sent,
    /// Delivered through the realtime channel or backfilled
    Delivered,
    /// Read by a participant other than the sender
    Read,
}

/// Message as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message identifier
    pub id: MessageId,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Author
    pub sender_id: UserId,
    /// Addressee
    pub receiver_id: UserId,
    /// Content, interpreted according to `kind`
    pub content: String,
    /// Content kind
    pub kind: MessageKind,
    /// Unix milliseconds; server time once delivered
    pub timestamp: u64,
    /// Delivery progress
    pub delivery: Delivery,
}

impl Message {
    /// Wrap a wire message with its delivery state.
    pub fn from_wire(message: ChatMessage, delivery: Delivery) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            kind: message.kind,
            timestamp: message.timestamp,
            delivery,
        }
    }

    /// Wire representation.
    pub fn to_wire(&self) -> ChatMessage {
        ChatMessage {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            content: self.content.clone(),
            kind: self.kind,
            timestamp: self.timestamp,
        }
    }
}

/// Result of [`MessageStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New message stored
    Inserted,
    /// Echo of an optimistic copy; now `Delivered` with the server timestamp
    Confirmed,
    /// Id already stored; nothing changed
    Duplicate,
}

impl AppendOutcome {
    /// True if the conversation's visible content changed.
    pub fn changed(self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

#[derive(Debug, Default)]
struct ConversationLog {
    /// Sorted by timestamp, ties in arrival order
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    typing: BTreeSet<UserId>,
    /// Readers per message; may name messages not yet received
    read_by: HashMap<MessageId, BTreeSet<UserId>>,
}

impl ConversationLog {
    fn append(&mut self, mut message: Message) -> AppendOutcome {
        if self.ids.contains(&message.id) {
            return self.confirm(message);
        }

        if self.read_by_other_than_sender(&message) {
            message.delivery = Delivery::Read;
        }

        self.ids.insert(message.id.clone());
        self.insert_sorted(message);
        AppendOutcome::Inserted
    }

    fn confirm(&mut self, echo: Message) -> AppendOutcome {
        if echo.delivery == Delivery::Sent {
            return AppendOutcome::Duplicate;
        }

        let Some(pos) = self.position(&echo.id) else {
            return AppendOutcome::Duplicate;
        };
        // Only the author's echo confirms; anyone else reusing the id is a duplicate
        let stored = &self.messages[pos];
        if stored.delivery != Delivery::Sent || stored.sender_id != echo.sender_id {
            return AppendOutcome::Duplicate;
        }

        let mut stored = self.messages.remove(pos);
        stored.timestamp = echo.timestamp;
        stored.delivery = if self.read_by_other_than_sender(&stored) {
            Delivery::Read
        } else {
            Delivery::Delivered
        };
        self.insert_sorted(stored);
        AppendOutcome::Confirmed
    }

    fn insert_sorted(&mut self, message: Message) {
        let at = self.messages.partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    fn read_by_other_than_sender(&self, message: &Message) -> bool {
        self.read_by
            .get(&message.id)
            .is_some_and(|readers| readers.iter().any(|r| r != &message.sender_id))
    }
}

/// Conversation-partitioned message log with typing and read state.
#[derive(Debug, Default)]
pub struct MessageStore {
    conversations: HashMap<ConversationId, ConversationLog>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message into its conversation.
    ///
    /// Never fails. Content is validated before it gets here.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        self.conversations.entry(message.conversation_id.clone()).or_default().append(message)
    }

    /// Messages of `conversation` in order. Empty for unknown conversations.
    pub fn messages(&self, conversation: &ConversationId) -> &[Message] {
        self.conversations.get(conversation).map(|log| log.messages.as_slice()).unwrap_or_default()
    }

    /// Stored message by id.
    pub fn get(&self, conversation: &ConversationId, id: &MessageId) -> Option<&Message> {
        let log = self.conversations.get(conversation)?;
        log.position(id).map(|pos| &log.messages[pos])
    }

    /// Conversations that have any state.
    pub fn conversations(&self) -> impl Iterator<Item = &ConversationId> {
        self.conversations.keys()
    }

    /// Add or remove `peer` from the typing set of `conversation`.
    ///
    /// Returns true if the set changed.
    pub fn set_typing(&mut self, conversation: &ConversationId, peer: &UserId, is_typing: bool) -> bool {
        if is_typing {
            self.conversations.entry(conversation.clone()).or_default().typing.insert(peer.clone())
        } else {
            self.conversations
                .get_mut(conversation)
                .is_some_and(|log| log.typing.remove(peer))
        }
    }

    /// Remove `peer` from every typing set.
    ///
    /// Returns the conversations that changed, in order.
    pub fn clear_typing_peer(&mut self, peer: &UserId) -> Vec<ConversationId> {
        let mut changed: Vec<ConversationId> = self
            .conversations
            .iter_mut()
            .filter_map(|(id, log)| log.typing.remove(peer).then(|| id.clone()))
            .collect();
        changed.sort();
        changed
    }

    /// Empty every typing set, e.g. once the connection that would carry the
    /// matching stops is gone.
    ///
    /// Returns the conversations that changed, in order.
    pub fn clear_all_typing(&mut self) -> Vec<ConversationId> {
        let mut changed: Vec<ConversationId> = self
            .conversations
            .iter_mut()
            .filter(|(_, log)| !log.typing.is_empty())
            .map(|(id, log)| {
                log.typing.clear();
                id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    /// Peers currently typing in `conversation`, in id order.
    pub fn typing_peers(&self, conversation: &ConversationId) -> impl Iterator<Item = &UserId> {
        self.conversations.get(conversation).into_iter().flat_map(|log| log.typing.iter())
    }

    /// Record that `reader` read `message`.
    ///
    /// A stored message read by anyone other than its sender becomes
    /// [`Delivery::Read`]. Receipts for messages not yet received are kept
    /// and applied when the message arrives. Returns true if anything
    /// changed.
    pub fn mark_read(&mut self, conversation: &ConversationId, message: &MessageId, reader: &UserId) -> bool {
        let log = self.conversations.entry(conversation.clone()).or_default();
        let recorded = log.read_by.entry(message.clone()).or_default().insert(reader.clone());
        if !recorded {
            return false;
        }

        if let Some(pos) = log.position(message) {
            let stored = &mut log.messages[pos];
            if &stored.sender_id != reader {
                stored.delivery = Delivery::Read;
            }
        }
        true
    }

    /// Readers of `message`, in id order.
    pub fn readers(&self, conversation: &ConversationId, message: &MessageId) -> impl Iterator<Item = &UserId> {
        self.conversations
            .get(conversation)
            .and_then(|log| log.read_by.get(message))
            .into_iter()
            .flat_map(|readers| readers.iter())
    }

    /// Messages in `conversation` from someone else that `user` has not read.
    pub fn unread_count(&self, conversation: &ConversationId, user: &UserId) -> usize {
        let Some(log) = self.conversations.get(conversation) else {
            return 0;
        };

        log.messages
            .iter()
            .filter(|m| &m.sender_id != user)
            .filter(|m| !log.read_by.get(&m.id).is_some_and(|readers| readers.contains(user)))
            .count()
    }

    /// Drop everything. Used on logout.
    pub fn clear(&mut self) {
        self.conversations.clear();
    }
}
