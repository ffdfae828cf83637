//! Connection lifecycle state machine.
//!
//! Tracks the single realtime connection of one local identity. The state
//! machine never opens sockets itself: [`Connection::begin`] tells the driver
//! whether to open a transport, wait for the attempt already in flight, or do
//! nothing; the driver reports the result back.
//!
//! # State Machine
//!
//! ```text
//!                  begin()                 opened(attempt)
//! ┌──────────────┐ ──────> ┌────────────┐ ──────────────> ┌───────────┐
//! │ Disconnected │         │ Connecting │                 │ Connected │
//! └──────────────┘ <────── └────────────┘                 └───────────┘
//!        ^          failed / disconnect                          │
//!        └───────────────────────────────────────────────────────┘
//!                          closed / disconnect
//! ```
//!
//! Every attempt gets a fresh number. Results for an attempt that is no
//! longer current (because `disconnect` ran while it was in flight) are
//! discarded.

use std::time::Duration;

use crate::error::ConnectionError;

/// Connection state observable by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport
    #[default]
    Disconnected,
    /// Transport attempt in flight
    Connecting,
    /// Transport open and authenticated
    Connected,
}

/// What the driver must do after [`Connection::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    /// Already connected; succeed immediately without side effects.
    AlreadyConnected,
    /// An attempt is in flight; await its outcome instead of starting another.
    InFlight {
        /// Attempt to wait for
        attempt: u64,
    },
    /// Open a transport and report back under this attempt number.
    Open {
        /// Newly started attempt
        attempt: u64,
    },
}

/// Connection state machine.
///
/// Pure state: no I/O, no clock.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    state: ConnectionState,
    /// Number of the latest attempt. Zero before the first attempt.
    attempt: u64,
}

impl Connection {
    /// Create a disconnected connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while connected. Network-emitting operations check this.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Latest attempt number.
    #[must_use]
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Request a connection (single-flight).
    pub fn begin(&mut self) -> ConnectStep {
        match self.state {
            ConnectionState::Connected => ConnectStep::AlreadyConnected,
            ConnectionState::Connecting => ConnectStep::InFlight { attempt: self.attempt },
            ConnectionState::Disconnected => {
                self.attempt += 1;
                self.state = ConnectionState::Connecting;
                tracing::debug!(attempt = self.attempt, "connection attempt started");
                ConnectStep::Open { attempt: self.attempt }
            },
        }
    }

    /// Transport for `attempt` opened successfully.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Cancelled` if `attempt` is no longer current; the
    ///   driver must tear the fresh transport down again.
    pub fn opened(&mut self, attempt: u64) -> Result<(), ConnectionError> {
        if !self.is_current(attempt) {
            return Err(ConnectionError::Cancelled);
        }

        self.state = ConnectionState::Connected;
        tracing::debug!(attempt, "connected");
        Ok(())
    }

    /// Transport for `attempt` failed to open.
    ///
    /// Returns `true` if the failure applied to the current attempt.
    pub fn failed(&mut self, attempt: u64) -> bool {
        if !self.is_current(attempt) {
            return false;
        }

        self.state = ConnectionState::Disconnected;
        tracing::debug!(attempt, "connection attempt failed");
        true
    }

    /// Live transport for `attempt` dropped.
    ///
    /// Returns `true` if this tore down the current connection.
    pub fn closed(&mut self, attempt: u64) -> bool {
        if attempt != self.attempt || self.state != ConnectionState::Connected {
            return false;
        }

        self.state = ConnectionState::Disconnected;
        true
    }

    /// Tear down unconditionally. Idempotent.
    ///
    /// An in-flight attempt is invalidated so its late result is discarded.
    /// Returns the state before the call.
    pub fn disconnect(&mut self) -> ConnectionState {
        let previous = self.state;
        if previous == ConnectionState::Connecting {
            // Burn the attempt number so opened()/failed() no longer match
            self.attempt += 1;
        }
        self.state = ConnectionState::Disconnected;
        previous
    }

    fn is_current(&self, attempt: u64) -> bool {
        attempt == self.attempt && self.state == ConnectionState::Connecting
    }
}

/// Bounded exponential backoff for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Retries before giving up. Zero disables automatic reconnection.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self { max_attempts: 0, ..Self::default() }
    }

    /// Delay before retry number `retry` (1-based). `None` once the budget is
    /// exhausted.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_attempts {
            return None;
        }

        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        Some(self.initial_backoff.saturating_mul(factor).min(self.max_backoff))
    }
}
