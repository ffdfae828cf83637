//! Error types for the Parley core.
//!
//! Connection errors describe the transport lifecycle, validation errors
//! describe rejected message content. Neither is fatal to the process: the
//! worst case is a disconnected session that reconnects.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while establishing or keeping a realtime connection.
///
/// `Clone` so a single-flight connect can hand the same outcome to every
/// waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Underlying transport failed to open or dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// Server refused the identity
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// Handshake did not complete in time
    #[error("connect timeout after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Peer violated the protocol during the handshake
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Attempt was abandoned because `disconnect` was called meanwhile
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Rejections and protocol violations repeat on every attempt; retrying
    /// them only adds load.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<parley_proto::ProtocolError> for ConnectionError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Rejected message content or envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Content is empty or whitespace only
    #[error("message content is empty")]
    EmptyContent,

    /// Content exceeds the configured limit
    #[error("message content too long: {len} chars (max {max})")]
    ContentTooLong {
        /// Content length in chars
        len: usize,
        /// Maximum permitted length
        max: usize,
    },

    /// Image content is not an http(s) URL
    #[error("image content is not an http(s) URL")]
    InvalidImageUrl,

    /// Location content is not `"<lat>,<lng>"` within range
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    /// Required envelope field is empty
    #[error("missing field: {0}")]
    MissingField(&'static str),
}
