//! Sans-IO messaging client.
//!
//! [`Client`] composes the core state machines for one local identity and
//! translates between UI intents, wire frames and state-change notifications.
//! It never blocks and never reads the clock: time arrives in events.

use std::{collections::BTreeSet, time::Duration};

use parley_core::{
    ConnectionError, ValidationError,
    connection::{ConnectStep, Connection, ConnectionState},
    env::Environment,
    membership::Membership,
    presence::PresenceTracker,
    store::{Delivery, Message, MessageStore},
    typing::{TypingDebouncer, TypingSignal},
    validate::{validate_content, validate_inbound},
};
use parley_proto::{
    ConversationId, Frame, MessageId, Payload, UserId,
    payloads::{
        chat::{ChatMessage, ConversationRef, MarkAsRead, MessageRead, Typing},
        presence::UserStatusChange,
    },
};
use tracing::{debug, info, warn};

use crate::{ClientAction, ClientError, ClientEvent, Draft, SessionConfig};

/// Messaging client state machine for one identity.
pub struct Client<E: Environment> {
    /// Environment for message ids and timestamps.
    env: E,

    /// Local user.
    identity: UserId,

    /// Connection lifecycle.
    connection: Connection,

    /// Conversations the UI has open.
    membership: Membership,

    /// Outbound typing bursts.
    typing: TypingDebouncer<E::Instant>,

    /// Messages, peer typing and read receipts.
    store: MessageStore,

    /// Peers known to be online.
    presence: PresenceTracker,

    /// Content length limit for sent and received messages.
    max_content_len: usize,
}

impl<E: Environment> Client<E> {
    /// Create a disconnected client for `identity`.
    pub fn new(env: E, identity: UserId, config: &SessionConfig) -> Self {
        Self {
            env,
            identity,
            connection: Connection::new(),
            membership: Membership::new(),
            typing: TypingDebouncer::new(config.typing_idle),
            store: MessageStore::new(),
            presence: PresenceTracker::new(),
            max_content_len: config.max_content_len,
        }
    }

    /// Local user.
    pub fn identity(&self) -> &UserId {
        &self.identity
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// True while connected.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Latest connection attempt number.
    pub fn attempt(&self) -> u64 {
        self.connection.attempt()
    }

    /// Message, typing and read state.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Peer presence.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Conversations the UI has open.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Time until the earliest local typing burst expires.
    pub fn next_typing_expiry(&self, now: E::Instant) -> Option<Duration> {
        self.typing.next_expiry(now)
    }

    /// Single-flight connect decision.
    ///
    /// On [`ConnectStep::Open`] the caller opens a transport and reports the
    /// result as `TransportOpened` or `TransportFailed` for that attempt.
    pub fn begin_connect(&mut self) -> ConnectStep {
        self.connection.begin()
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotConnected` for `Send` while not connected
    /// - `ClientError::Validation` for a `Send` with bad content
    /// - `ClientError::Connection(Cancelled)` for `TransportOpened` of an
    ///   attempt abandoned by `Disconnect`
    /// - `ClientError::Protocol` if an outbound frame cannot be encoded
    ///
    /// A failed event leaves the state unchanged.
    pub fn handle(&mut self, event: ClientEvent<E::Instant>) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::TransportOpened { attempt } => self.handle_transport_opened(attempt),
            ClientEvent::TransportFailed { attempt, error } => {
                Ok(self.handle_transport_failed(attempt, &error))
            },
            ClientEvent::TransportClosed { attempt, reason } => {
                Ok(self.handle_transport_closed(attempt, &reason))
            },
            ClientEvent::Disconnect => Ok(self.handle_disconnect()),
            ClientEvent::FrameReceived(frame) => Ok(self.handle_frame(&frame)),
            ClientEvent::Tick { now } => self.handle_tick(now),
            ClientEvent::Enter { conversation_id } => self.handle_enter(conversation_id),
            ClientEvent::Exit { conversation_id } => self.handle_exit(&conversation_id),
            ClientEvent::TextChanged { conversation_id, has_content, now } => {
                self.handle_text_changed(&conversation_id, has_content, now)
            },
            ClientEvent::Send(draft) => self.send(draft).map(|(_, actions)| actions),
            ClientEvent::MarkRead { conversation_id, message_id } => {
                self.handle_mark_read(conversation_id, message_id)
            },
            ClientEvent::Backfill(messages) => Ok(self.handle_backfill(messages)),
            ClientEvent::Logout => Ok(self.handle_logout()),
        }
    }

    fn handle_transport_opened(&mut self, attempt: u64) -> Result<Vec<ClientAction>, ClientError> {
        // Encode before committing so a failure leaves us Connecting
        let rejoins = self
            .membership
            .iter()
            .map(|id| send(Payload::JoinConversation(ConversationRef { conversation_id: id.clone() })))
            .collect::<Result<Vec<_>, _>>()?;

        self.connection.opened(attempt)?;
        info!(user = %self.identity, attempt, rejoined = rejoins.len(), "connected");

        let mut actions = vec![ClientAction::ConnectionChanged(ConnectionState::Connected)];
        actions.extend(rejoins);
        Ok(actions)
    }

    fn handle_transport_failed(&mut self, attempt: u64, error: &ConnectionError) -> Vec<ClientAction> {
        if !self.connection.failed(attempt) {
            debug!(attempt, %error, "ignoring failure of stale attempt");
            return vec![];
        }

        warn!(user = %self.identity, attempt, %error, "connection attempt failed");
        vec![ClientAction::ConnectionChanged(ConnectionState::Disconnected)]
    }

    fn handle_transport_closed(&mut self, attempt: u64, reason: &str) -> Vec<ClientAction> {
        if !self.connection.closed(attempt) {
            debug!(attempt, reason, "ignoring close of stale transport");
            return vec![];
        }

        warn!(user = %self.identity, attempt, reason, "connection lost");
        let mut actions = self.teardown();
        if !self.membership.is_empty() {
            actions.push(ClientAction::Reconnect);
        }
        actions
    }

    fn handle_disconnect(&mut self) -> Vec<ClientAction> {
        if self.connection.disconnect() == ConnectionState::Disconnected {
            return vec![];
        }

        info!(user = %self.identity, "disconnected");
        self.teardown()
    }

    /// Local cleanup once the transport is gone.
    ///
    /// Typing bursts are dropped without stops: there is no channel left to
    /// carry them. Peer typing sets are emptied because their stops would
    /// arrive on the dead channel.
    fn teardown(&mut self) -> Vec<ClientAction> {
        self.typing.reset();

        let mut actions = vec![ClientAction::ConnectionChanged(ConnectionState::Disconnected)];
        actions.extend(
            self.store
                .clear_all_typing()
                .into_iter()
                .map(|conversation_id| ClientAction::ConversationChanged { conversation_id }),
        );
        actions
    }

    fn handle_frame(&mut self, frame: &Frame) -> Vec<ClientAction> {
        if !self.connection.is_connected() {
            debug!(opcode = frame.opcode, "dropping frame received while disconnected");
            return vec![];
        }

        if let Some(opcode) = frame.opcode_enum().filter(|opcode| !opcode.is_inbound()) {
            warn!(event = opcode.event_name(), "dropping client-only event from server");
            return vec![];
        }

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(opcode = frame.opcode, %error, "dropping malformed inbound frame");
                return vec![];
            },
        };

        match payload {
            Payload::NewMessage(message) => self.handle_new_message(message),
            Payload::Typing(typing) => self.handle_peer_typing(&typing),
            Payload::UserStatusChange(status) => self.handle_status_change(&status),
            Payload::MessageRead(read) => self.handle_message_read(&read),
            Payload::Goodbye(goodbye) => {
                info!(reason = %goodbye.reason, "server said goodbye");
                vec![]
            },
            // Handshake replies and outbound-only events are filtered above
            _ => vec![],
        }
    }

    fn handle_new_message(&mut self, message: ChatMessage) -> Vec<ClientAction> {
        if let Err(error) = validate_inbound(&message, self.max_content_len) {
            warn!(id = %message.id, %error, "dropping invalid inbound message");
            return vec![];
        }

        let conversation_id = message.conversation_id.clone();
        let outcome = self.store.append(Message::from_wire(message, Delivery::Delivered));
        debug!(conversation = %conversation_id, ?outcome, "new message");

        if outcome.changed() {
            vec![ClientAction::ConversationChanged { conversation_id }]
        } else {
            vec![]
        }
    }

    fn handle_peer_typing(&mut self, typing: &Typing) -> Vec<ClientAction> {
        if typing.user_id == self.identity {
            return vec![];
        }
        if typing.user_id.is_empty() || typing.conversation_id.is_empty() {
            warn!("dropping typing event without user or conversation");
            return vec![];
        }

        if self.store.set_typing(&typing.conversation_id, &typing.user_id, typing.is_typing) {
            vec![ClientAction::ConversationChanged { conversation_id: typing.conversation_id.clone() }]
        } else {
            vec![]
        }
    }

    fn handle_status_change(&mut self, status: &UserStatusChange) -> Vec<ClientAction> {
        if status.user_id.is_empty() {
            warn!("dropping presence event without user");
            return vec![];
        }
        if !self.presence.apply(&status.user_id, status.is_online) {
            return vec![];
        }

        debug!(user = %status.user_id, online = status.is_online, "presence changed");
        let mut actions =
            vec![ClientAction::PresenceChanged { user_id: status.user_id.clone(), online: status.is_online }];

        // An offline peer is not typing anywhere
        if !status.is_online {
            actions.extend(
                self.store
                    .clear_typing_peer(&status.user_id)
                    .into_iter()
                    .map(|conversation_id| ClientAction::ConversationChanged { conversation_id }),
            );
        }
        actions
    }

    fn handle_message_read(&mut self, read: &MessageRead) -> Vec<ClientAction> {
        if read.read_by.is_empty() || read.message_id.is_empty() {
            warn!("dropping read receipt without reader or message");
            return vec![];
        }

        if self.store.mark_read(&read.conversation_id, &read.message_id, &read.read_by) {
            vec![ClientAction::ConversationChanged { conversation_id: read.conversation_id.clone() }]
        } else {
            vec![]
        }
    }

    fn handle_tick(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        let stops = self.typing.tick(now);
        if !self.connection.is_connected() {
            return Ok(vec![]);
        }

        stops
            .into_iter()
            .map(|signal| self.typing_frame(signal))
            .collect()
    }

    fn handle_enter(&mut self, conversation_id: ConversationId) -> Result<Vec<ClientAction>, ClientError> {
        if conversation_id.is_empty() {
            return Err(ValidationError::MissingField("conversationId").into());
        }
        if self.membership.contains(&conversation_id) {
            return Ok(vec![]);
        }

        let join = if self.connection.is_connected() {
            vec![send(Payload::JoinConversation(ConversationRef { conversation_id: conversation_id.clone() }))?]
        } else {
            vec![]
        };

        self.membership.enter(&conversation_id);
        debug!(conversation = %conversation_id, connected = !join.is_empty(), "entered conversation");
        Ok(join)
    }

    fn handle_exit(&mut self, conversation_id: &ConversationId) -> Result<Vec<ClientAction>, ClientError> {
        if !self.membership.contains(conversation_id) {
            return Ok(vec![]);
        }

        let mut actions = Vec::new();
        if self.connection.is_connected() {
            if self.typing.is_typing(conversation_id) {
                actions.push(self.typing_frame(TypingSignal::Stop(conversation_id.clone()))?);
            }
            actions.push(send(Payload::LeaveConversation(ConversationRef {
                conversation_id: conversation_id.clone(),
            }))?);
        }

        self.typing.end(conversation_id);
        self.membership.exit(conversation_id);
        debug!(conversation = %conversation_id, "exited conversation");
        Ok(actions)
    }

    fn handle_text_changed(
        &mut self,
        conversation_id: &ConversationId,
        has_content: bool,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if !self.connection.is_connected() {
            return Ok(vec![]);
        }

        match self.typing.on_text_changed(conversation_id, has_content, now) {
            Some(signal) => Ok(vec![self.typing_frame(signal)?]),
            None => Ok(vec![]),
        }
    }

    /// Frames a [`send`](Self::send) to `conversation_id` would emit.
    pub fn send_frame_count(&self, conversation_id: &ConversationId) -> usize {
        1 + usize::from(self.typing.is_typing(conversation_id))
    }

    /// Send a draft, returning the generated message id with the actions.
    ///
    /// Same as `handle(ClientEvent::Send(draft))` for callers that need the
    /// id.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotConnected` while not connected; nothing changes
    /// - `ClientError::Validation` if the content is rejected
    pub fn send(&mut self, draft: Draft) -> Result<(MessageId, Vec<ClientAction>), ClientError> {
        if !self.connection.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if draft.conversation_id.is_empty() {
            return Err(ValidationError::MissingField("conversationId").into());
        }
        validate_content(draft.kind, &draft.content, self.max_content_len)?;

        let message = ChatMessage {
            id: MessageId::new(format!("{:032x}", self.env.random_u128())),
            conversation_id: draft.conversation_id,
            sender_id: self.identity.clone(),
            receiver_id: draft.receiver_id,
            content: draft.content,
            kind: draft.kind,
            timestamp: self.env.wall_clock_millis(),
        };

        // Everything that can fail happens before any state changes
        let send_frame = send(Payload::SendMessage(message.clone()))?;
        let stop_frame = if self.typing.is_typing(&message.conversation_id) {
            Some(self.typing_frame(TypingSignal::Stop(message.conversation_id.clone()))?)
        } else {
            None
        };

        self.typing.end(&message.conversation_id);
        let conversation_id = message.conversation_id.clone();
        let message_id = message.id.clone();
        self.store.append(Message::from_wire(message, Delivery::Sent));
        debug!(conversation = %conversation_id, id = %message_id, "message sent");

        let mut actions: Vec<ClientAction> = stop_frame.into_iter().collect();
        actions.push(send_frame);
        actions.push(ClientAction::ConversationChanged { conversation_id });
        Ok((message_id, actions))
    }

    fn handle_mark_read(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let receipt = if self.connection.is_connected() {
            Some(send(Payload::MarkAsRead(MarkAsRead {
                conversation_id: conversation_id.clone(),
                message_id: message_id.clone(),
                user_id: self.identity.clone(),
            }))?)
        } else {
            None
        };

        if !self.store.mark_read(&conversation_id, &message_id, &self.identity) {
            return Ok(vec![]);
        }

        let mut actions: Vec<ClientAction> = receipt.into_iter().collect();
        actions.push(ClientAction::ConversationChanged { conversation_id });
        Ok(actions)
    }

    fn handle_backfill(&mut self, messages: Vec<ChatMessage>) -> Vec<ClientAction> {
        let mut changed = BTreeSet::new();

        for message in messages {
            if let Err(error) = validate_inbound(&message, self.max_content_len) {
                warn!(id = %message.id, %error, "skipping invalid backfilled message");
                continue;
            }

            let conversation_id = message.conversation_id.clone();
            if self.store.append(Message::from_wire(message, Delivery::Delivered)).changed() {
                changed.insert(conversation_id);
            }
        }

        changed.into_iter().map(|conversation_id| ClientAction::ConversationChanged { conversation_id }).collect()
    }

    fn handle_logout(&mut self) -> Vec<ClientAction> {
        let mut actions = self.handle_disconnect();

        let mut cleared: Vec<ConversationId> = self.store.conversations().cloned().collect();
        cleared.sort();
        // Teardown may already have reported some of these
        cleared.retain(|id| !actions.contains(&ClientAction::ConversationChanged { conversation_id: id.clone() }));

        let went_offline = self.presence.online_peers();

        self.store.clear();
        self.presence.clear();
        self.membership.clear();
        self.typing.reset();
        info!(user = %self.identity, "logged out");

        actions.extend(cleared.into_iter().map(|conversation_id| ClientAction::ConversationChanged { conversation_id }));
        actions.extend(went_offline.into_iter().map(|user_id| ClientAction::PresenceChanged { user_id, online: false }));
        actions
    }

    fn typing_frame(&self, signal: TypingSignal) -> Result<ClientAction, ClientError> {
        let (conversation_id, is_typing) = match signal {
            TypingSignal::Start(id) => (id, true),
            TypingSignal::Stop(id) => (id, false),
        };

        send(Payload::Typing(Typing { user_id: self.identity.clone(), conversation_id, is_typing }))
    }
}

fn send(payload: Payload) -> Result<ClientAction, ClientError> {
    Ok(ClientAction::Send(payload.into_frame()?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_core::env::test_utils::MockEnv;
    use parley_proto::{
        Opcode,
        payloads::{chat::MessageKind, session::Goodbye},
    };

    use super::*;

    type Event = ClientEvent<Duration>;

    fn client(user: &str) -> Client<MockEnv> {
        Client::new(MockEnv::new(), UserId::from(user), &SessionConfig::default())
    }

    fn connected(user: &str) -> Client<MockEnv> {
        let mut client = client(user);
        let ConnectStep::Open { attempt } = client.begin_connect() else {
            panic!("fresh client must open");
        };
        client.handle(Event::TransportOpened { attempt }).unwrap();
        client
    }

    fn c1() -> ConversationId {
        ConversationId::from("c1")
    }

    fn frames(actions: &[ClientAction]) -> Vec<Payload> {
        actions
            .iter()
            .filter_map(|action| match action {
                ClientAction::Send(frame) => Some(Payload::from_frame(frame).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn typing(user: &str, is_typing: bool) -> Payload {
        Payload::Typing(Typing { user_id: UserId::from(user), conversation_id: c1(), is_typing })
    }

    fn join() -> Payload {
        Payload::JoinConversation(ConversationRef { conversation_id: c1() })
    }

    fn inbound(payload: Payload) -> Event {
        Event::FrameReceived(payload.into_frame().unwrap())
    }

    fn peer_message(id: &str, timestamp: u64) -> ChatMessage {
        ChatMessage {
            id: MessageId::from(id),
            conversation_id: c1(),
            sender_id: UserId::from("u2"),
            receiver_id: UserId::from("u1"),
            content: "hey".to_string(),
            kind: MessageKind::Text,
            timestamp,
        }
    }

    #[test]
    fn send_while_disconnected_fails_without_state_change() {
        let mut client = client("u1");
        client.handle(Event::Enter { conversation_id: c1() }).unwrap();

        let result = client.handle(Event::Send(Draft::text("c1", "u2", "hola")));

        assert_eq!(result, Err(ClientError::NotConnected));
        assert!(client.store().messages(&c1()).is_empty());
    }

    #[test]
    fn sent_message_is_stored_once_despite_echo() {
        let mut client = connected("u1");
        client.handle(Event::Enter { conversation_id: c1() }).unwrap();

        let actions = client.handle(Event::Send(Draft::text("c1", "u2", "hola"))).unwrap();

        let sent_frames = frames(&actions);
        let [Payload::SendMessage(sent)] = sent_frames.as_slice() else {
            panic!("expected one send_message, got {actions:?}");
        };
        let stored = client.store().messages(&c1());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender_id, UserId::from("u1"));
        assert_eq!(stored[0].content, "hola");
        assert_eq!(stored[0].delivery, Delivery::Sent);
        assert!(actions.contains(&ClientAction::ConversationChanged { conversation_id: c1() }));

        // Server echo confirms; a redelivery after that changes nothing
        let mut echo = sent.clone();
        echo.timestamp += 5;
        client.handle(inbound(Payload::NewMessage(echo.clone()))).unwrap();
        let again = client.handle(inbound(Payload::NewMessage(echo))).unwrap();

        assert!(again.is_empty());
        let stored = client.store().messages(&c1());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].delivery, Delivery::Delivered);
    }

    #[test]
    fn invalid_draft_is_rejected() {
        let mut client = connected("u1");

        let empty = client.handle(Event::Send(Draft::text("c1", "u2", "   ")));
        let bad_image = client.handle(Event::Send(Draft::image("c1", "u2", "not a url")));

        assert_eq!(empty, Err(ClientError::Validation(ValidationError::EmptyContent)));
        assert_eq!(bad_image, Err(ClientError::Validation(ValidationError::InvalidImageUrl)));
        assert!(client.store().messages(&c1()).is_empty());
    }

    #[test]
    fn enter_is_idempotent_and_exit_without_enter_is_noop() {
        let mut client = connected("u1");

        assert!(client.handle(Event::Exit { conversation_id: c1() }).unwrap().is_empty());

        let first = client.handle(Event::Enter { conversation_id: c1() }).unwrap();
        let second = client.handle(Event::Enter { conversation_id: c1() }).unwrap();

        assert_eq!(frames(&first), vec![join()]);
        assert!(second.is_empty());
        assert_eq!(client.membership().iter().count(), 1);
    }

    #[test]
    fn interest_recorded_offline_is_joined_on_connect() {
        let mut client = client("u1");
        assert!(client.handle(Event::Enter { conversation_id: c1() }).unwrap().is_empty());

        let ConnectStep::Open { attempt } = client.begin_connect() else { panic!("expected open") };
        let actions = client.handle(Event::TransportOpened { attempt }).unwrap();

        assert_eq!(actions[0], ClientAction::ConnectionChanged(ConnectionState::Connected));
        assert_eq!(frames(&actions), vec![join()]);
    }

    #[test]
    fn begin_connect_is_single_flight() {
        let mut client = client("u1");

        let ConnectStep::Open { attempt } = client.begin_connect() else { panic!("expected open") };
        assert_eq!(client.begin_connect(), ConnectStep::InFlight { attempt });

        client.handle(Event::TransportOpened { attempt }).unwrap();
        assert_eq!(client.begin_connect(), ConnectStep::AlreadyConnected);
    }

    #[test]
    fn disconnect_while_connecting_cancels_attempt() {
        let mut client = client("u1");
        let ConnectStep::Open { attempt } = client.begin_connect() else { panic!("expected open") };

        client.handle(Event::Disconnect).unwrap();
        let result = client.handle(Event::TransportOpened { attempt });

        assert_eq!(result, Err(ClientError::Connection(ConnectionError::Cancelled)));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut client = connected("u1");

        let first = client.handle(Event::Disconnect).unwrap();
        let second = client.handle(Event::Disconnect).unwrap();

        assert_eq!(first, vec![ClientAction::ConnectionChanged(ConnectionState::Disconnected)]);
        assert!(second.is_empty());
    }

    #[test]
    fn failed_attempt_returns_to_disconnected() {
        let mut client = client("u1");
        let ConnectStep::Open { attempt } = client.begin_connect() else { panic!("expected open") };

        let actions = client
            .handle(Event::TransportFailed { attempt, error: ConnectionError::Transport("refused".into()) })
            .unwrap();

        assert_eq!(actions, vec![ClientAction::ConnectionChanged(ConnectionState::Disconnected)]);
        assert!(matches!(client.begin_connect(), ConnectStep::Open { .. }));
    }

    #[test]
    fn drop_with_open_conversations_requests_reconnect() {
        let mut client = connected("u1");
        let attempt = client.attempt();
        client.handle(Event::Enter { conversation_id: c1() }).unwrap();

        let actions = client.handle(Event::TransportClosed { attempt, reason: "reset".into() }).unwrap();

        assert_eq!(actions.first(), Some(&ClientAction::ConnectionChanged(ConnectionState::Disconnected)));
        assert_eq!(actions.last(), Some(&ClientAction::Reconnect));
        assert!(client.membership().contains(&c1()));
    }

    #[test]
    fn drop_without_open_conversations_stays_down() {
        let mut client = connected("u1");
        let attempt = client.attempt();

        let actions = client.handle(Event::TransportClosed { attempt, reason: "reset".into() }).unwrap();

        assert!(!actions.contains(&ClientAction::Reconnect));
    }

    #[test]
    fn typing_burst_emits_start_once_and_stop_after_idle() {
        let mut client = connected("u1");
        let changed = |client: &mut Client<MockEnv>, ms: u64| {
            let now = Duration::from_millis(ms);
            client.handle(Event::TextChanged { conversation_id: c1(), has_content: true, now }).unwrap()
        };

        let mut sent = frames(&changed(&mut client, 0));
        sent.extend(frames(&changed(&mut client, 200)));
        sent.extend(frames(&changed(&mut client, 400)));
        sent.extend(frames(&client.handle(Event::Tick { now: Duration::from_millis(1399) }).unwrap()));
        assert_eq!(sent, vec![typing("u1", true)]);

        let stop = client.handle(Event::Tick { now: Duration::from_millis(1400) }).unwrap();
        assert_eq!(frames(&stop), vec![typing("u1", false)]);
    }

    #[test]
    fn typing_while_disconnected_is_noop() {
        let mut client = client("u1");
        let actions = client
            .handle(Event::TextChanged { conversation_id: c1(), has_content: true, now: Duration::ZERO })
            .unwrap();

        assert!(actions.is_empty());
        assert_eq!(client.next_typing_expiry(Duration::ZERO), None);
    }

    #[test]
    fn send_stops_typing_before_sending() {
        let mut client = connected("u1");
        client
            .handle(Event::TextChanged { conversation_id: c1(), has_content: true, now: Duration::ZERO })
            .unwrap();

        let actions = client.handle(Event::Send(Draft::text("c1", "u2", "hola"))).unwrap();
        let sent = frames(&actions);

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], typing("u1", false));
        assert_eq!(sent[1].opcode(), Opcode::SendMessage);

        // Burst is over; the timer has nothing left to stop
        assert!(client.handle(Event::Tick { now: Duration::from_secs(5) }).unwrap().is_empty());
    }

    #[test]
    fn exit_stops_typing_before_leaving() {
        let mut client = connected("u1");
        client.handle(Event::Enter { conversation_id: c1() }).unwrap();
        client
            .handle(Event::TextChanged { conversation_id: c1(), has_content: true, now: Duration::ZERO })
            .unwrap();

        let actions = client.handle(Event::Exit { conversation_id: c1() }).unwrap();

        assert_eq!(
            frames(&actions),
            vec![typing("u1", false), Payload::LeaveConversation(ConversationRef { conversation_id: c1() })]
        );
    }

    #[test]
    fn exit_keeps_history_and_peer_typing() {
        let mut client = connected("u1");
        client.handle(Event::Enter { conversation_id: c1() }).unwrap();
        client.handle(inbound(Payload::NewMessage(peer_message("m1", 10)))).unwrap();
        client.handle(inbound(typing("u2", true))).unwrap();

        client.handle(Event::Exit { conversation_id: c1() }).unwrap();

        assert!(!client.membership().contains(&c1()));
        let ids: Vec<&str> = client.store().messages(&c1()).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1"]);
        assert_eq!(client.store().typing_peers(&c1()).collect::<Vec<_>>(), [&UserId::from("u2")]);
    }

    #[test]
    fn peer_typing_has_no_local_expiry() {
        let mut client = connected("u1");
        client.handle(inbound(typing("u2", true))).unwrap();
        client.handle(Event::Tick { now: Duration::from_millis(2000) }).unwrap();

        assert_eq!(client.store().typing_peers(&c1()).collect::<Vec<_>>(), [&UserId::from("u2")]);

        client.handle(inbound(typing("u2", false))).unwrap();
        assert_eq!(client.store().typing_peers(&c1()).count(), 0);
    }

    #[test]
    fn own_typing_echo_is_ignored() {
        let mut client = connected("u1");
        let actions = client.handle(inbound(typing("u1", true))).unwrap();

        assert!(actions.is_empty());
        assert_eq!(client.store().typing_peers(&c1()).count(), 0);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut client = connected("u1");

        let garbage = Frame::new(Opcode::NewMessage, vec![0xff, 0x00, 0x13]);
        let unknown = Frame { opcode: 0x7777, payload: Default::default() };
        let mut empty_id = peer_message("m1", 10);
        empty_id.id = MessageId::from("");

        assert!(client.handle(Event::FrameReceived(garbage)).unwrap().is_empty());
        assert!(client.handle(Event::FrameReceived(unknown)).unwrap().is_empty());
        assert!(client.handle(inbound(Payload::NewMessage(empty_id))).unwrap().is_empty());
        assert!(client.handle(inbound(Payload::Goodbye(Goodbye { reason: "bye".into() }))).unwrap().is_empty());
        // Well-formed but outbound-only
        assert!(client.handle(inbound(Payload::SendMessage(peer_message("m3", 30)))).unwrap().is_empty());
        assert!(client.store().get(&c1(), &MessageId::from("m3")).is_none());

        // Session still works
        let actions = client.handle(inbound(Payload::NewMessage(peer_message("m2", 20)))).unwrap();
        assert_eq!(actions, vec![ClientAction::ConversationChanged { conversation_id: c1() }]);
    }

    #[test]
    fn offline_peer_stops_typing() {
        let mut client = connected("u1");
        let u2 = UserId::from("u2");
        client.handle(inbound(typing("u2", true))).unwrap();
        client.handle(inbound(Payload::UserStatusChange(UserStatusChange { user_id: u2.clone(), is_online: true }))).unwrap();
        assert!(client.presence().is_online(&u2));

        let actions = client
            .handle(inbound(Payload::UserStatusChange(UserStatusChange { user_id: u2.clone(), is_online: false })))
            .unwrap();

        assert_eq!(
            actions,
            vec![
                ClientAction::PresenceChanged { user_id: u2.clone(), online: false },
                ClientAction::ConversationChanged { conversation_id: c1() },
            ]
        );
        assert!(!client.presence().is_online(&u2));
        assert_eq!(client.store().typing_peers(&c1()).count(), 0);
    }

    #[test]
    fn mark_read_emits_receipt_only_while_connected() {
        let mut offline = client("u1");
        offline.handle(Event::Backfill(vec![peer_message("m1", 10)])).unwrap();
        let actions = offline.handle(Event::MarkRead { conversation_id: c1(), message_id: MessageId::from("m1") }).unwrap();
        assert!(frames(&actions).is_empty());
        assert_eq!(offline.store().unread_count(&c1(), &UserId::from("u1")), 0);

        let mut online = connected("u1");
        online.handle(inbound(Payload::NewMessage(peer_message("m1", 10)))).unwrap();
        let actions = online.handle(Event::MarkRead { conversation_id: c1(), message_id: MessageId::from("m1") }).unwrap();
        assert_eq!(
            frames(&actions),
            vec![Payload::MarkAsRead(MarkAsRead {
                conversation_id: c1(),
                message_id: MessageId::from("m1"),
                user_id: UserId::from("u1"),
            })]
        );
        assert_eq!(online.store().get(&c1(), &MessageId::from("m1")).unwrap().delivery, Delivery::Read);

        // Second read is a no-op
        let again = online.handle(Event::MarkRead { conversation_id: c1(), message_id: MessageId::from("m1") }).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn peer_receipt_marks_our_message_read() {
        let mut client = connected("u1");
        let actions = client.handle(Event::Send(Draft::text("c1", "u2", "hola"))).unwrap();
        let sent_frames = frames(&actions);
        let [Payload::SendMessage(sent)] = sent_frames.as_slice() else { panic!("expected send") };

        client
            .handle(inbound(Payload::MessageRead(MessageRead {
                conversation_id: c1(),
                message_id: sent.id.clone(),
                read_by: UserId::from("u2"),
            })))
            .unwrap();

        assert_eq!(client.store().get(&c1(), &sent.id).unwrap().delivery, Delivery::Read);
    }

    #[test]
    fn backfill_dedups_against_live_messages() {
        let mut client = connected("u1");
        client.handle(inbound(Payload::NewMessage(peer_message("m2", 20)))).unwrap();

        let actions = client
            .handle(Event::Backfill(vec![peer_message("m1", 10), peer_message("m2", 20)]))
            .unwrap();

        assert_eq!(actions, vec![ClientAction::ConversationChanged { conversation_id: c1() }]);
        let ids: Vec<&str> = client.store().messages(&c1()).iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[test]
    fn message_ids_are_unique() {
        let mut client = connected("u1");
        let a = client.handle(Event::Send(Draft::text("c1", "u2", "one"))).unwrap();
        let b = client.handle(Event::Send(Draft::text("c1", "u2", "two"))).unwrap();

        let id = |actions: &[ClientAction]| match frames(actions).pop() {
            Some(Payload::SendMessage(message)) => message.id,
            other => panic!("expected send_message, got {other:?}"),
        };
        assert_ne!(id(&a), id(&b));
        assert_eq!(id(&a).as_str().len(), 32);
    }

    #[test]
    fn logout_clears_everything() {
        let mut client = connected("u1");
        client.handle(Event::Enter { conversation_id: c1() }).unwrap();
        client.handle(inbound(Payload::NewMessage(peer_message("m1", 10)))).unwrap();
        client.handle(inbound(Payload::UserStatusChange(UserStatusChange { user_id: "u2".into(), is_online: true }))).unwrap();

        let actions = client.handle(Event::Logout).unwrap();

        assert_eq!(
            actions,
            vec![
                ClientAction::ConnectionChanged(ConnectionState::Disconnected),
                ClientAction::ConversationChanged { conversation_id: c1() },
                ClientAction::PresenceChanged { user_id: UserId::from("u2"), online: false },
            ]
        );
        assert!(client.store().messages(&c1()).is_empty());
        assert!(client.presence().online_peers().is_empty());
        assert!(client.membership().is_empty());
    }
}
