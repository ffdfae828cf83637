//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary, payloads use CBOR for type safety and forward
//! compatibility. The `Payload` enum covers the transport handshake and every
//! realtime event of the messaging channel.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Decoding the encoding of a payload yields the same value.

pub mod chat;
pub mod presence;
pub mod session;

use bytes::BufMut;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Frame, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
///
/// The payload type is determined by the `Opcode` in the frame header, so we
/// serialize only the inner struct content (no variant tag in CBOR). A frame
/// whose opcode disagrees with its contents fails to decode instead of being
/// reinterpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session
    /// Transport handshake
    Hello(session::Hello),
    /// Server response to Hello
    HelloReply(session::HelloReply),
    /// Graceful disconnect
    Goodbye(session::Goodbye),

    // Client events
    /// `join_conversation`
    JoinConversation(chat::ConversationRef),
    /// `leave_conversation`
    LeaveConversation(chat::ConversationRef),
    /// `send_message`
    SendMessage(chat::ChatMessage),
    /// `typing`, in either direction
    Typing(chat::Typing),
    /// `mark_as_read`
    MarkAsRead(chat::MarkAsRead),

    // Server events
    /// `new_message`
    NewMessage(chat::ChatMessage),
    /// `user_status_change`
    UserStatusChange(presence::UserStatusChange),
    /// `message_read`
    MessageRead(chat::MessageRead),
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::JoinConversation(_) => Opcode::JoinConversation,
            Self::LeaveConversation(_) => Opcode::LeaveConversation,
            Self::SendMessage(_) => Opcode::SendMessage,
            Self::Typing(_) => Opcode::Typing,
            Self::MarkAsRead(_) => Opcode::MarkAsRead,
            Self::NewMessage(_) => Opcode::NewMessage,
            Self::UserStatusChange(_) => Opcode::UserStatusChange,
            Self::MessageRead(_) => Opcode::MessageRead,
        }
    }

    /// Encode payload to buffer.
    ///
    /// Serializes only the inner struct, NOT the variant tag. Size limits are
    /// enforced later by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Hello(inner) => encode_cbor(inner, dst),
            Self::HelloReply(inner) => encode_cbor(inner, dst),
            Self::Goodbye(inner) => encode_cbor(inner, dst),
            Self::JoinConversation(inner) | Self::LeaveConversation(inner) => {
                encode_cbor(inner, dst)
            },
            Self::SendMessage(inner) | Self::NewMessage(inner) => encode_cbor(inner, dst),
            Self::Typing(inner) => encode_cbor(inner, dst),
            Self::MarkAsRead(inner) => encode_cbor(inner, dst),
            Self::UserStatusChange(inner) => encode_cbor(inner, dst),
            Self::MessageRead(inner) => encode_cbor(inner, dst),
        }
    }

    /// Decode payload from bytes based on opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > Frame::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: Frame::MAX_PAYLOAD_SIZE,
            });
        }

        let payload = match opcode {
            Opcode::Hello => Self::Hello(decode_cbor(opcode, bytes)?),
            Opcode::HelloReply => Self::HelloReply(decode_cbor(opcode, bytes)?),
            Opcode::Goodbye => Self::Goodbye(decode_cbor(opcode, bytes)?),
            Opcode::JoinConversation => Self::JoinConversation(decode_cbor(opcode, bytes)?),
            Opcode::LeaveConversation => Self::LeaveConversation(decode_cbor(opcode, bytes)?),
            Opcode::SendMessage => Self::SendMessage(decode_cbor(opcode, bytes)?),
            Opcode::Typing => Self::Typing(decode_cbor(opcode, bytes)?),
            Opcode::MarkAsRead => Self::MarkAsRead(decode_cbor(opcode, bytes)?),
            Opcode::NewMessage => Self::NewMessage(decode_cbor(opcode, bytes)?),
            Opcode::UserStatusChange => Self::UserStatusChange(decode_cbor(opcode, bytes)?),
            Opcode::MessageRead => Self::MessageRead(decode_cbor(opcode, bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(self.opcode(), buf))
    }

    /// Parse payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the opcode is not recognized
    /// - `ProtocolError::CborDecode` if CBOR deserialization fails
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds maximum size
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = Opcode::try_from(frame.opcode)?;
        Self::decode(opcode, &frame.payload)
    }
}

fn encode_cbor<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    ciborium::ser::into_writer(value, dst.writer())
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn decode_cbor<T: DeserializeOwned>(opcode: Opcode, bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode {
        event: opcode.event_name(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{
        chat::{ChatMessage, ConversationRef, MessageKind, Typing},
        *,
    };

    fn message() -> ChatMessage {
        ChatMessage {
            id: "m-1".into(),
            conversation_id: "c1".into(),
            sender_id: "u1".into(),
            receiver_id: "u2".into(),
            content: "hola".to_owned(),
            kind: MessageKind::Text,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn send_message_survives_framing() {
        let payload = Payload::SendMessage(message());
        let frame = payload.clone().into_frame().expect("should create frame");

        assert_eq!(frame.opcode_enum(), Some(Opcode::SendMessage));
        assert_eq!(Payload::from_frame(&frame).expect("should parse payload"), payload);
    }

    #[test]
    fn opcode_selects_variant_for_shared_shapes() {
        let frame = Payload::SendMessage(message()).into_frame().unwrap();
        let relabeled = Frame { opcode: Opcode::NewMessage.to_u16(), ..frame };

        assert!(matches!(Payload::from_frame(&relabeled), Ok(Payload::NewMessage(_))));
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let frame = Payload::JoinConversation(ConversationRef { conversation_id: "c1".into() })
            .into_frame()
            .unwrap();
        let relabeled = Frame { opcode: Opcode::Typing.to_u16(), ..frame };

        let result = Payload::from_frame(&relabeled);
        assert!(matches!(result, Err(ProtocolError::CborDecode { event: "typing", .. })));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let frame = Frame { opcode: 0x0999, payload: bytes::Bytes::new() };
        assert_eq!(Payload::from_frame(&frame), Err(ProtocolError::UnknownOpcode(0x0999)));
    }

    #[test]
    fn wire_field_names_match_socket_events() {
        #[derive(serde::Deserialize)]
        struct Loose {
            #[serde(rename = "conversationId")]
            conversation_id: String,
            #[serde(rename = "isTyping")]
            is_typing: bool,
        }

        let frame = Payload::Typing(Typing {
            user_id: "u2".into(),
            conversation_id: "c1".into(),
            is_typing: true,
        })
        .into_frame()
        .unwrap();

        let loose: Loose = ciborium::de::from_reader(&frame.payload[..]).unwrap();
        assert_eq!(loose.conversation_id, "c1");
        assert!(loose.is_typing);
    }
}
