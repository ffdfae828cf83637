//! Transport handshake payloads.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Current protocol version sent in [`Hello`].
pub const PROTOCOL_VERSION: u8 = 1;

/// First frame on a new transport, authenticating the local identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    /// Protocol version spoken by the client
    pub version: u8,
    /// Identity this connection acts for
    pub user_id: UserId,
    /// Optional bearer token issued by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Server acceptance of a [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloReply {
    /// Server-assigned session identifier
    pub session_id: u64,
}

/// Graceful disconnect, sent by either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Human-readable reason
    pub reason: String,
}
