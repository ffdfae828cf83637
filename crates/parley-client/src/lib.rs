//! Parley client
//!
//! Client side of a realtime messaging session: connection lifecycle,
//! conversation membership, typing indicators, optimistic sends and the
//! message/presence state the UI renders.
//!
//! # Architecture
//!
//! Two layers, following the Sans-IO split of [`parley_core`]:
//!
//! - [`Client`]: pure state machine. It receives [`ClientEvent`]s and returns
//!   [`ClientAction`]s (frames to send, state-change notifications) for the
//!   caller to execute.
//! - [`Session`]: async handle driving a [`Client`] over a [`Transport`]. It
//!   serializes every mutation behind one lock, runs the inbound dispatcher,
//!   the typing timer and the reconnect supervisor, and exposes live
//!   [`ConversationView`]s.
//!
//! # Transport (optional)
//!
//! With the `quic` feature enabled, [`quic::QuicTransport`] connects to a
//! server over QUIC.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod config;
mod error;
mod event;
mod session;
mod system_env;
mod transport;

#[cfg(feature = "quic")]
pub mod quic;

pub use client::Client;
pub use config::SessionConfig;
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, Draft};
pub use parley_core::{
    ConnectionError, ValidationError,
    connection::{ConnectStep, ConnectionState, ReconnectPolicy},
    env::Environment,
    store::{Delivery, Message},
};
pub use parley_proto::{ConversationId, MessageId, UserId, payloads::chat::MessageKind};
pub use session::{ConversationView, Session};
pub use system_env::SystemEnv;
pub use transport::{Channel, Transport};
