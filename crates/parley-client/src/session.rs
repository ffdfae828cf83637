//! Async session driving a [`Client`] over a [`Transport`].
//!
//! A [`Session`] is a cheap-to-clone handle for one identity. Every mutation
//! goes through one lock around the [`Client`], so inbound events and UI
//! calls are serialized and readers never see a half-applied change. The
//! lock is never held across `.await`.
//!
//! # Tasks
//!
//! - Connect attempt: one per [`ConnectStep::Open`], publishing its outcome
//!   on a `watch` channel every concurrent `connect` call waits on.
//! - Dispatcher: one per live connection, feeding inbound frames into the
//!   client and reporting channel close.
//! - Typing timer: sleeps until the earliest typing burst expires; woken
//!   whenever the compose box changes.
//! - Reconnect supervisor: retries with bounded exponential backoff after
//!   the connection drops while conversations are open.
//!
//! Background tasks hold weak references. Dropping the last handle (views
//! included) aborts them and tears down the connection.

#![allow(clippy::disallowed_types, reason = "Synchronous locking only, never held across .await")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use parley_core::{
    ConnectionError,
    connection::{ConnectStep, ConnectionState, ReconnectPolicy},
    env::Environment,
    store::Message,
};
use parley_proto::{ConversationId, Frame, MessageId, UserId, payloads::chat::ChatMessage};
use tokio::{
    sync::{Notify, mpsc, watch},
    task::AbortHandle,
};
use tracing::{debug, error, info, warn};

use crate::{Channel, Client, ClientAction, ClientError, ClientEvent, Draft, SessionConfig, Transport};

/// Outcome of a connect attempt; `None` while in flight.
type Outcome = Option<Result<(), ConnectionError>>;

/// Messaging session for one identity.
pub struct Session<T: Transport, E: Environment> {
    inner: Arc<Inner<T, E>>,
}

impl<T: Transport, E: Environment> Clone for Session<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<T: Transport, E: Environment> {
    transport: T,
    env: E,
    reconnect: ReconnectPolicy,
    state: Mutex<State<E>>,
    /// Wakes the typing timer when bursts change
    typing_wake: Arc<Notify>,
    connection: watch::Sender<ConnectionState>,
    /// Bumped whenever any peer's presence changes
    presence: watch::Sender<u64>,
}

struct State<E: Environment> {
    client: Client<E>,
    live: Option<Live>,
    pending: Option<Pending>,
    /// Per-conversation change counters backing [`ConversationView`]
    revisions: HashMap<ConversationId, watch::Sender<u64>>,
    reconnect_task: Option<AbortHandle>,
    typing_timer: Option<AbortHandle>,
}

/// In-flight connect attempt.
struct Pending {
    attempt: u64,
    outcome: watch::Sender<Outcome>,
}

/// Open connection.
struct Live {
    attempt: u64,
    to_server: mpsc::Sender<Frame>,
    io: Option<AbortHandle>,
    dispatcher: Option<AbortHandle>,
}

impl Live {
    fn stop(self) {
        for task in [self.io, self.dispatcher].into_iter().flatten() {
            task.abort();
        }
    }
}

impl<E: Environment> State<E> {
    /// Push a frame onto the ordered outbound queue.
    fn push(&self, frame: Frame) {
        let Some(live) = &self.live else {
            debug!(opcode = frame.opcode, "no live channel, dropping frame");
            return;
        };

        if let Err(error) = live.to_server.try_send(frame) {
            warn!(attempt = live.attempt, %error, "outbound queue rejected frame");
        }
    }

    fn bump(&self, conversation_id: &ConversationId) {
        if let Some(revision) = self.revisions.get(conversation_id) {
            revision.send_modify(|r| *r = r.wrapping_add(1));
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.outcome.send_replace(Some(Err(ConnectionError::Cancelled)));
        }
    }

    fn stop_connection(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        if let Some(live) = self.live.take() {
            live.stop();
        }
        self.cancel_pending();
    }
}

impl<T: Transport, E: Environment> Drop for Inner<T, E> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.stop_connection();
        if let Some(timer) = state.typing_timer.take() {
            timer.abort();
        }
    }
}

impl<T: Transport, E: Environment> Inner<T, E> {
    fn lock(&self) -> MutexGuard<'_, State<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(self: &Arc<Self>, state: &mut State<E>, event: ClientEvent<E::Instant>) -> Result<(), ClientError> {
        let actions = state.client.handle(event)?;
        self.execute(state, actions);
        Ok(())
    }

    /// Apply an event raised by a background task, where nobody can take
    /// the error.
    fn apply_logged(self: &Arc<Self>, state: &mut State<E>, event: ClientEvent<E::Instant>) {
        if let Err(error) = self.apply(state, event) {
            warn!(%error, "session event failed");
        }
    }

    fn execute(self: &Arc<Self>, state: &mut State<E>, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::Send(frame) => state.push(frame),
                ClientAction::ConnectionChanged(connection) => {
                    self.connection.send_replace(connection);
                },
                ClientAction::ConversationChanged { conversation_id } => state.bump(&conversation_id),
                ClientAction::PresenceChanged { .. } => {
                    self.presence.send_modify(|r| *r = r.wrapping_add(1));
                },
                ClientAction::Reconnect => self.spawn_reconnect(state),
            }
        }
    }

    /// Start or join a connect attempt.
    ///
    /// `None` when already connected.
    fn begin_connect(self: &Arc<Self>) -> Option<watch::Receiver<Outcome>> {
        let mut state = self.lock();
        match state.client.begin_connect() {
            ConnectStep::AlreadyConnected => None,
            ConnectStep::InFlight { attempt } => match &state.pending {
                Some(pending) if pending.attempt == attempt => Some(pending.outcome.subscribe()),
                // Attempt without a waiter record cannot exist; report it as abandoned
                _ => Some(watch::channel(Some(Err(ConnectionError::Cancelled))).1),
            },
            ConnectStep::Open { attempt } => {
                let (outcome, waiter) = watch::channel(None);
                state.pending = Some(Pending { attempt, outcome });
                self.connection.send_replace(ConnectionState::Connecting);
                tokio::spawn(Arc::clone(self).run_attempt(attempt));
                Some(waiter)
            },
        }
    }

    async fn run_attempt(self: Arc<Self>, attempt: u64) {
        let identity = self.lock().client.identity().clone();
        debug!(user = %identity, attempt, "opening transport");

        let result = self.transport.connect(identity).await;
        self.finish_attempt(attempt, result);
    }

    fn finish_attempt(self: &Arc<Self>, attempt: u64, result: Result<Channel, ConnectionError>) {
        let mut state = self.lock();
        let outcome = match result {
            Ok(channel) => self.open(&mut state, attempt, channel),
            Err(error) => {
                self.apply_logged(&mut state, ClientEvent::TransportFailed { attempt, error: error.clone() });
                Err(error)
            },
        };

        if let Some(pending) = state.pending.take_if(|p| p.attempt == attempt) {
            pending.outcome.send_replace(Some(outcome));
        }
    }

    fn open(self: &Arc<Self>, state: &mut State<E>, attempt: u64, channel: Channel) -> Result<(), ConnectionError> {
        let (to_server, from_server, io) = channel.into_parts();

        let actions = match state.client.handle(ClientEvent::TransportOpened { attempt }) {
            Ok(actions) => actions,
            Err(error) => {
                if let Some(io) = io {
                    io.abort();
                }
                let error = match error {
                    ClientError::Connection(error) => error,
                    other => ConnectionError::Protocol(other.to_string()),
                };
                if error != ConnectionError::Cancelled {
                    self.apply_logged(state, ClientEvent::TransportFailed { attempt, error: error.clone() });
                }
                debug!(attempt, %error, "discarding opened transport");
                return Err(error);
            },
        };

        if let Some(stale) = state.live.take() {
            stale.stop();
        }
        let dispatcher = tokio::spawn(run_dispatcher(Arc::downgrade(self), attempt, from_server));
        state.live = Some(Live { attempt, to_server, io, dispatcher: Some(dispatcher.abort_handle()) });
        self.execute(state, actions);
        Ok(())
    }

    fn dispatch(self: &Arc<Self>, attempt: u64, frame: Frame) {
        let mut state = self.lock();
        if !state.live.as_ref().is_some_and(|live| live.attempt == attempt) {
            return;
        }
        self.apply_logged(&mut state, ClientEvent::FrameReceived(frame));
    }

    fn transport_closed(self: &Arc<Self>, attempt: u64, reason: &str) {
        let mut state = self.lock();
        if let Some(live) = state.live.take_if(|live| live.attempt == attempt) {
            live.stop();
        }
        self.apply_logged(&mut state, ClientEvent::TransportClosed { attempt, reason: reason.to_string() });
    }

    fn spawn_reconnect(self: &Arc<Self>, state: &mut State<E>) {
        if self.reconnect.max_attempts == 0 {
            debug!("automatic reconnection disabled");
            return;
        }

        // A drop restarts the backoff schedule
        if let Some(previous) = state.reconnect_task.take() {
            previous.abort();
        }
        let task = tokio::spawn(run_reconnect(Arc::downgrade(self), self.env.clone(), self.reconnect));
        state.reconnect_task = Some(task.abort_handle());
    }

    fn ensure_typing_timer(self: &Arc<Self>, state: &mut State<E>) {
        if state.typing_timer.is_some() {
            return;
        }
        let task =
            tokio::spawn(run_typing_timer(Arc::downgrade(self), Arc::clone(&self.typing_wake), self.env.clone()));
        state.typing_timer = Some(task.abort_handle());
    }
}

async fn await_outcome(mut waiter: watch::Receiver<Outcome>) -> Result<(), ClientError> {
    let outcome = waiter.wait_for(Option::is_some).await.map(|outcome| (*outcome).clone()).ok().flatten();
    outcome.unwrap_or(Err(ConnectionError::Cancelled)).map_err(ClientError::from)
}

async fn run_dispatcher<T: Transport, E: Environment>(
    session: Weak<Inner<T, E>>,
    attempt: u64,
    mut from_server: mpsc::Receiver<Frame>,
) {
    while let Some(frame) = from_server.recv().await {
        let Some(inner) = session.upgrade() else { return };
        inner.dispatch(attempt, frame);
    }

    if let Some(inner) = session.upgrade() {
        inner.transport_closed(attempt, "channel closed by transport");
    }
}

async fn run_typing_timer<T: Transport, E: Environment>(session: Weak<Inner<T, E>>, wake: Arc<Notify>, env: E) {
    loop {
        let wait = {
            let Some(inner) = session.upgrade() else { return };
            let now = env.now();
            let mut state = inner.lock();
            inner.apply_logged(&mut state, ClientEvent::Tick { now });
            state.client.next_typing_expiry(now)
        };

        match wait {
            Some(delay) => {
                tokio::select! {
                    () = env.sleep(delay) => {},
                    () = wake.notified() => {},
                }
            },
            None => wake.notified().await,
        }
    }
}

async fn run_reconnect<T: Transport, E: Environment>(session: Weak<Inner<T, E>>, env: E, policy: ReconnectPolicy) {
    for retry in 1.. {
        let Some(delay) = policy.delay(retry) else {
            error!(retries = retry - 1, "reconnect budget exhausted, giving up");
            return;
        };
        debug!(retry, ?delay, "reconnecting after backoff");
        env.sleep(delay).await;

        let Some(inner) = session.upgrade() else { return };
        if inner.lock().client.membership().is_empty() {
            debug!("no open conversations, reconnect abandoned");
            return;
        }

        match (Session { inner }).connect().await {
            Ok(()) => {
                info!(retry, "reconnected");
                return;
            },
            Err(error) if error.is_transient() => {
                warn!(retry, %error, "reconnect attempt failed");
            },
            Err(error) => {
                error!(retry, %error, "reconnect refused, giving up");
                return;
            },
        }
    }
}

impl<T: Transport, E: Environment> Session<T, E> {
    /// Create a disconnected session for `identity`.
    pub fn new(transport: T, env: E, identity: UserId, config: SessionConfig) -> Self {
        let client = Client::new(env.clone(), identity, &config);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (presence, _) = watch::channel(0);

        let inner = Inner {
            transport,
            env,
            reconnect: config.reconnect,
            state: Mutex::new(State {
                client,
                live: None,
                pending: None,
                revisions: HashMap::new(),
                reconnect_task: None,
                typing_timer: None,
            }),
            typing_wake: Arc::new(Notify::new()),
            connection,
            presence,
        };
        Self { inner: Arc::new(inner) }
    }

    /// Local user.
    pub fn identity(&self) -> UserId {
        self.inner.lock().client.identity().clone()
    }

    /// Connect the realtime channel.
    ///
    /// Succeeds immediately when already connected. While an attempt is in
    /// flight, waits for that attempt instead of starting another; every
    /// waiter gets the same outcome. Dropping the returned future does not
    /// abandon the attempt.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connection` with the transport error, or `Cancelled`
    ///   if [`disconnect`](Self::disconnect) ran meanwhile
    pub async fn connect(&self) -> Result<(), ClientError> {
        match self.inner.begin_connect() {
            None => Ok(()),
            Some(waiter) => await_outcome(waiter).await,
        }
    }

    /// [`connect`](Self::connect), retrying transient failures with the
    /// configured backoff.
    pub async fn connect_with_retry(&self) -> Result<(), ClientError> {
        let policy = self.inner.reconnect;
        let mut retry = 0;

        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_transient() => {
                    retry += 1;
                    let Some(delay) = policy.delay(retry) else {
                        error!(retries = retry - 1, %error, "connect budget exhausted");
                        return Err(error);
                    };
                    warn!(retry, ?delay, %error, "connect failed, retrying");
                    self.inner.env.sleep(delay).await;
                },
                Err(error) => return Err(error),
            }
        }
    }

    /// Tear the connection down. Idempotent.
    ///
    /// Cancels an in-flight attempt (its waiters get `Cancelled`) and stops
    /// automatic reconnection. Open conversations stay recorded and are
    /// rejoined by the next `connect`.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock();
        state.stop_connection();
        self.inner.apply_logged(&mut state, ClientEvent::Disconnect);
    }

    /// A view for `conversation_id` became visible.
    ///
    /// Joins the room when connected; always records interest so a
    /// reconnect rejoins it. Entering twice is a no-op.
    pub fn enter(&self, conversation_id: impl Into<ConversationId>) -> Result<(), ClientError> {
        let mut state = self.inner.lock();
        self.inner.apply(&mut state, ClientEvent::Enter { conversation_id: conversation_id.into() })
    }

    /// The view for `conversation_id` went away.
    ///
    /// Leaves the room when connected. Stored messages are kept. Exiting a
    /// conversation that was never entered is a no-op.
    pub fn exit(&self, conversation_id: impl Into<ConversationId>) -> Result<(), ClientError> {
        let mut state = self.inner.lock();
        self.inner.apply(&mut state, ClientEvent::Exit { conversation_id: conversation_id.into() })
    }

    /// The compose box for `conversation_id` changed.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime (starts the typing timer).
    pub fn text_changed(&self, conversation_id: impl Into<ConversationId>, has_content: bool) -> Result<(), ClientError> {
        let now = self.inner.env.now();
        let mut state = self.inner.lock();
        self.inner.ensure_typing_timer(&mut state);
        self.inner.apply(&mut state, ClientEvent::TextChanged { conversation_id: conversation_id.into(), has_content, now })?;
        self.inner.typing_wake.notify_one();
        Ok(())
    }

    /// Send a message.
    ///
    /// Ends the local typing burst, emits the message and stores an
    /// optimistic copy, all before returning.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotConnected` while not connected; nothing changes
    /// - `ClientError::Validation` if the content is rejected
    /// - `ClientError::QueueFull` if the outbound queue has no room; nothing
    ///   changes
    pub fn send(&self, draft: Draft) -> Result<MessageId, ClientError> {
        let mut state = self.inner.lock();
        if let Some(live) = &state.live {
            let needed = state.client.send_frame_count(&draft.conversation_id);
            if live.to_server.capacity() < needed {
                warn!(attempt = live.attempt, needed, "outbound queue full, refusing send");
                return Err(ClientError::QueueFull);
            }
        }

        let (message_id, actions) = state.client.send(draft)?;
        self.inner.execute(&mut state, actions);
        Ok(message_id)
    }

    /// Record that the local user read `message_id`.
    pub fn mark_read(
        &self,
        conversation_id: impl Into<ConversationId>,
        message_id: impl Into<MessageId>,
    ) -> Result<(), ClientError> {
        let mut state = self.inner.lock();
        let event = ClientEvent::MarkRead { conversation_id: conversation_id.into(), message_id: message_id.into() };
        self.inner.apply(&mut state, event)
    }

    /// Merge history fetched from the durable backend.
    ///
    /// Same dedup rule as live delivery; invalid entries are skipped.
    pub fn backfill(&self, messages: Vec<ChatMessage>) {
        let mut state = self.inner.lock();
        self.inner.apply_logged(&mut state, ClientEvent::Backfill(messages));
    }

    /// Disconnect and drop all session state.
    pub fn logout(&self) {
        let mut state = self.inner.lock();
        state.stop_connection();
        self.inner.apply_logged(&mut state, ClientEvent::Logout);
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().client.connection_state()
    }

    /// Connection state as an observable.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// Counter bumped on every presence change.
    pub fn watch_presence(&self) -> watch::Receiver<u64> {
        self.inner.presence.subscribe()
    }

    /// Messages of `conversation_id`, in order.
    pub fn messages_for(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.inner.lock().client.store().messages(conversation_id).to_vec()
    }

    /// Peers typing in `conversation_id`, in id order.
    pub fn typing_peers_for(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        self.inner.lock().client.store().typing_peers(conversation_id).cloned().collect()
    }

    /// Whether `user_id` is known to be online.
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.inner.lock().client.presence().is_online(user_id)
    }

    /// Peers known to be online, sorted.
    pub fn online_peers(&self) -> Vec<UserId> {
        self.inner.lock().client.presence().online_peers()
    }

    /// Messages from others in `conversation_id` the local user has not read.
    pub fn unread_count(&self, conversation_id: &ConversationId) -> usize {
        let state = self.inner.lock();
        state.client.store().unread_count(conversation_id, state.client.identity())
    }

    /// Live view of one conversation.
    pub fn conversation(&self, conversation_id: impl Into<ConversationId>) -> ConversationView<T, E> {
        let conversation_id = conversation_id.into();
        let changes = self
            .inner
            .lock()
            .revisions
            .entry(conversation_id.clone())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe();

        ConversationView { session: self.clone(), conversation_id, changes }
    }
}

/// Live, read-only view of one conversation.
///
/// Reads always reflect the latest state. [`changed`](Self::changed)
/// resolves after messages, typing peers or read state change.
pub struct ConversationView<T: Transport, E: Environment> {
    session: Session<T, E>,
    conversation_id: ConversationId,
    changes: watch::Receiver<u64>,
}

impl<T: Transport, E: Environment> ConversationView<T, E> {
    /// Conversation shown by this view.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Messages, in order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.session.messages_for(&self.conversation_id)
    }

    /// Peers currently typing.
    pub fn typing_peers(&self) -> Vec<UserId> {
        self.session.typing_peers_for(&self.conversation_id)
    }

    /// Unread messages from others.
    pub fn unread_count(&self) -> usize {
        self.session.unread_count(&self.conversation_id)
    }

    /// Wait for the next change.
    pub async fn changed(&mut self) -> bool {
        self.changes.changed().await.is_ok()
    }
}
