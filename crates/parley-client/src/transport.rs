//! Transport seam.
//!
//! A [`Transport`] opens an authenticated realtime channel for an identity
//! and hands back a [`Channel`]: an ordered pair of frame queues. The
//! [`Session`](crate::Session) never touches sockets itself.

use parley_core::ConnectionError;
use parley_proto::{Frame, UserId};
use tokio::sync::mpsc;

/// Opens realtime channels.
///
/// Implementations own the transport-level timeout: `connect` must resolve
/// within a bounded time.
pub trait Transport: Send + Sync + 'static {
    /// Open a channel authenticated as `identity`.
    fn connect(&self, identity: UserId) -> impl Future<Output = Result<Channel, ConnectionError>> + Send;
}

/// Open realtime channel.
///
/// Frames pushed on `to_server` leave in order. `from_server` closes when the
/// connection drops.
#[derive(Debug)]
pub struct Channel {
    /// Send frames to the server.
    pub to_server: mpsc::Sender<Frame>,
    /// Receive frames from the server.
    pub from_server: mpsc::Receiver<Frame>,
    /// Abort handle for the task doing the I/O, if any.
    abort_handle: Option<tokio::task::AbortHandle>,
}

impl Channel {
    /// Channel over existing queues with no I/O task behind it.
    pub fn new(to_server: mpsc::Sender<Frame>, from_server: mpsc::Receiver<Frame>) -> Self {
        Self { to_server, from_server, abort_handle: None }
    }

    /// Channel whose I/O runs in the task behind `abort_handle`.
    pub fn with_task(
        to_server: mpsc::Sender<Frame>,
        from_server: mpsc::Receiver<Frame>,
        abort_handle: tokio::task::AbortHandle,
    ) -> Self {
        Self { to_server, from_server, abort_handle: Some(abort_handle) }
    }

    /// Split into queues and task handle.
    pub fn into_parts(self) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>, Option<tokio::task::AbortHandle>) {
        (self.to_server, self.from_server, self.abort_handle)
    }
}
