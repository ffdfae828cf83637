//! Frame type combining opcode and payload.
//!
//! Layout on the wire:
//! `[opcode: u16 BE][payload_len: u32 BE][payload: payload_len bytes]`
//!
//! This is a pure data holder. For typed access see `Payload::into_frame()`
//! and `Payload::from_frame()`.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame (transport layer)
///
/// Holds raw payload bytes, NOT the `Payload` enum, so a transport can move
/// frames without parsing CBOR. The opcode is kept raw: an unknown opcode is
/// still a well-formed frame and is rejected only when the payload is parsed.
///
/// # Invariants
///
/// - Size Limit: `payload.len()` MUST NOT exceed [`Frame::MAX_PAYLOAD_SIZE`].
///   Violations are rejected by [`Frame::encode`] and [`Frame::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw opcode
    pub opcode: u16,

    /// Raw payload bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Size of the serialized header (opcode + length)
    pub const HEADER_SIZE: usize = 6;

    /// Maximum payload size (64 KiB). Chat payloads are small; anything larger
    /// is a broken or hostile peer.
    pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

    /// Create a frame for a known opcode.
    #[must_use]
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self { opcode: opcode.to_u16(), payload: payload.into() }
    }

    /// Opcode as enum. `None` if the opcode is unknown.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode)
    }

    /// Payload length claimed by a serialized header.
    ///
    /// Used by stream transports to learn how many bytes to read next.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than `HEADER_SIZE` bytes
    /// - `ProtocolError::PayloadTooLarge` if the claimed length exceeds the
    ///   limit
    pub fn payload_len(header: &[u8]) -> Result<usize> {
        if header.len() < Self::HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: Self::HEADER_SIZE,
                actual: header.len(),
            });
        }

        let mut len_bytes = &header[2..Self::HEADER_SIZE];
        let len = len_bytes.get_u32() as usize;
        if len > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: len, max: Self::MAX_PAYLOAD_SIZE });
        }

        Ok(len)
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if payload exceeds
    ///   `MAX_PAYLOAD_SIZE`
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        dst.put_u16(self.opcode);
        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode a frame from wire format.
    ///
    /// Does NOT parse the payload. Trailing bytes beyond the claimed payload
    /// are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if the header is incomplete
    /// - `ProtocolError::PayloadTooLarge` if the claimed length exceeds the
    ///   limit
    /// - `ProtocolError::FrameTruncated` if fewer payload bytes than claimed
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let payload_len = Self::payload_len(bytes)?;
        let opcode = u16::from_be_bytes([bytes[0], bytes[1]]);

        let body = bytes.get(Self::HEADER_SIZE..Self::HEADER_SIZE + payload_len).ok_or(
            ProtocolError::FrameTruncated {
                expected: payload_len,
                actual: bytes.len().saturating_sub(Self::HEADER_SIZE),
            },
        )?;

        Ok(Self { opcode, payload: Bytes::copy_from_slice(body) })
    }
}
