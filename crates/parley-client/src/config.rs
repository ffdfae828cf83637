//! Session configuration.

use std::time::Duration;

use parley_core::{connection::ReconnectPolicy, typing::TYPING_IDLE_MS, validate::MAX_CONTENT_LEN};

/// Tunables for a [`Session`](crate::Session) and its [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle window after which a typing burst ends
    pub typing_idle: Duration,
    /// Maximum message content length in chars
    pub max_content_len: usize,
    /// Automatic reconnection after the connection drops
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_idle: Duration::from_millis(TYPING_IDLE_MS),
            max_content_len: MAX_CONTENT_LEN,
            reconnect: ReconnectPolicy::default(),
        }
    }
}
