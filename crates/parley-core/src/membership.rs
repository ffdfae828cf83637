//! Conversation membership.
//!
//! Records which conversations the local views are interested in. Interest
//! is recorded immediately whether or not a connection exists, so a
//! reconnect can rejoin every room. Leaving never touches stored history.

use std::collections::BTreeSet;

use parley_proto::ConversationId;

/// Conversations the local user currently has open.
#[derive(Debug, Default, Clone)]
pub struct Membership {
    interested: BTreeSet<ConversationId>,
}

impl Membership {
    /// Create an empty membership set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest. Returns false if already entered.
    pub fn enter(&mut self, conversation: &ConversationId) -> bool {
        self.interested.insert(conversation.clone())
    }

    /// Drop interest. Returns false if the conversation was never entered.
    pub fn exit(&mut self, conversation: &ConversationId) -> bool {
        self.interested.remove(conversation)
    }

    /// Whether `conversation` is entered.
    pub fn contains(&self, conversation: &ConversationId) -> bool {
        self.interested.contains(conversation)
    }

    /// Entered conversations, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ConversationId> {
        self.interested.iter()
    }

    /// True when no conversation is entered.
    pub fn is_empty(&self) -> bool {
        self.interested.is_empty()
    }

    /// Drop all interest.
    pub fn clear(&mut self) {
        self.interested.clear();
    }
}
