//! Parley wire protocol
//!
//! Framing and payload types for the realtime messaging channel. A frame is a
//! 6-byte binary header (opcode + payload length) followed by a CBOR payload.
//! The opcode alone identifies the payload type, so payloads carry no variant
//! tag.
//!
//! # Components
//!
//! - [`Frame`]: transport-layer packet (opcode + raw payload bytes)
//! - [`Opcode`]: one code per realtime event, with its socket event name
//! - [`Payload`]: typed view of a frame's contents
//! - [`UserId`], [`ConversationId`], [`MessageId`]: string identifiers

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod frame;
mod ids;
mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use ids::{ConversationId, MessageId, UserId};
pub use opcode::Opcode;
pub use payloads::Payload;
