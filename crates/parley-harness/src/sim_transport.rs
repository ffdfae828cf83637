//! In-memory realtime channel.
//!
//! [`SimTransport`] plays the server end of every connection a session
//! opens. Tests script connect outcomes, read what the client sent and
//! inject server events.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use parley_client::{Channel, Transport};
use parley_core::ConnectionError;
use parley_proto::{Frame, Payload, UserId};
use tokio::sync::mpsc;
use tracing::debug;

/// Default frames buffered per direction.
const CHANNEL_CAPACITY: usize = 256;

/// Server end of the current connection.
struct ServerEnd {
    from_client: mpsc::Receiver<Frame>,
    to_client: mpsc::Sender<Frame>,
}

struct SharedState {
    /// Identity of every connect call, in order
    attempts: Vec<UserId>,
    /// Scripted failures, consumed one per attempt
    failures: VecDeque<ConnectionError>,
    /// Latency of each connect call
    delay: Duration,
    server: Option<ServerEnd>,
    /// Frames received from the client, across connections
    outgoing: Vec<Frame>,
    /// Frames buffered per direction of each new connection
    capacity: usize,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            attempts: Vec::new(),
            failures: VecDeque::new(),
            delay: Duration::ZERO,
            server: None,
            outgoing: Vec::new(),
            capacity: CHANNEL_CAPACITY,
        }
    }
}

impl SharedState {
    fn drain(&mut self) {
        if let Some(server) = &mut self.server {
            while let Ok(frame) = server.from_client.try_recv() {
                self.outgoing.push(frame);
            }
        }
    }
}

/// Scriptable [`Transport`] for deterministic tests.
///
/// Clones share state: hand one to the session, keep one in the test.
#[derive(Clone, Default)]
pub struct SimTransport {
    state: Arc<Mutex<SharedState>>,
}

impl SimTransport {
    /// Transport whose connects succeed immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect take `delay` of (virtual) time.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    /// Buffer only `capacity` frames per direction on later connections.
    #[must_use]
    pub fn with_capacity(self, capacity: usize) -> Self {
        self.lock().capacity = capacity.max(1);
        self
    }

    /// Fail the next connect attempt with `error`.
    pub fn fail_next(&self, error: ConnectionError) {
        self.lock().failures.push_back(error);
    }

    /// Number of connect calls so far.
    pub fn connect_attempts(&self) -> usize {
        self.lock().attempts.len()
    }

    /// Identities passed to each connect call.
    pub fn identities(&self) -> Vec<UserId> {
        self.lock().attempts.clone()
    }

    /// True while a connection is open and the client still holds its end.
    pub fn client_connected(&self) -> bool {
        self.lock().server.as_ref().is_some_and(|server| !server.to_client.is_closed())
    }

    /// Take every frame the client sent since the last call.
    pub fn take_outgoing(&self) -> Vec<Frame> {
        let mut state = self.lock();
        state.drain();
        std::mem::take(&mut state.outgoing)
    }

    /// [`take_outgoing`](Self::take_outgoing), decoded. Undecodable frames
    /// are skipped.
    pub fn sent_payloads(&self) -> Vec<Payload> {
        self.take_outgoing().iter().filter_map(|frame| Payload::from_frame(frame).ok()).collect()
    }

    /// Deliver a server event on the current connection.
    ///
    /// Returns false if there is no connection or the payload cannot be
    /// encoded.
    pub fn inject(&self, payload: Payload) -> bool {
        payload.into_frame().is_ok_and(|frame| self.inject_frame(frame))
    }

    /// Deliver a raw frame on the current connection.
    pub fn inject_frame(&self, frame: Frame) -> bool {
        self.lock().server.as_ref().is_some_and(|server| server.to_client.try_send(frame).is_ok())
    }

    /// Drop the current connection from the server side.
    pub fn drop_connection(&self) {
        let mut state = self.lock();
        state.drain();
        if state.server.take().is_some() {
            debug!("simulated connection dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for SimTransport {
    fn connect(&self, identity: UserId) -> impl Future<Output = Result<Channel, ConnectionError>> + Send {
        let transport = self.clone();

        async move {
            let delay = {
                let mut state = transport.lock();
                state.attempts.push(identity);
                state.delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut state = transport.lock();
            if let Some(error) = state.failures.pop_front() {
                debug!(%error, "simulated connect failure");
                return Err(error);
            }

            // Keep what the previous connection delivered
            state.drain();

            let (to_server, from_client) = mpsc::channel(state.capacity);
            let (to_client, from_server) = mpsc::channel(state.capacity);
            state.server = Some(ServerEnd { from_client, to_client });
            Ok(Channel::new(to_server, from_server))
        }
    }
}
