//! Parley core
//!
//! Sans-IO building blocks for a client-side messaging session. Nothing in
//! this crate performs I/O or reads the clock: time is passed in, and every
//! network effect is returned to the caller as data.
//!
//! # Components
//!
//! - [`connection::Connection`]: connect/disconnect lifecycle with
//!   single-flight attempts
//! - [`typing::TypingDebouncer`]: keystrokes to `typing` start/stop signals
//! - [`store::MessageStore`]: ordered, deduplicated per-conversation log with
//!   typing and read state
//! - [`presence::PresenceTracker`]: peers known to be online
//! - [`membership::Membership`]: conversations a view is interested in
//! - [`validate`]: per-kind message content validation

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod membership;
pub mod presence;
pub mod store;
pub mod typing;
pub mod validate;

pub use error::{ConnectionError, ValidationError};
