//! Client error types.

use parley_core::{ConnectionError, ValidationError};
use parley_proto::ProtocolError;
use thiserror::Error;

/// Errors returned by [`Client`](crate::Client) and
/// [`Session`](crate::Session) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Operation needs a live connection
    #[error("not connected")]
    NotConnected,

    /// Message content was rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Connection could not be established
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Outbound queue cannot take the frames; nothing was changed
    #[error("outbound queue full")]
    QueueFull,

    /// Frame could not be built
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// True if the operation may succeed once the connection recovers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotConnected | Self::QueueFull => true,
            Self::Connection(err) => err.is_transient(),
            Self::Validation(_) | Self::Protocol(_) => false,
        }
    }
}
