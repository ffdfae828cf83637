//! Presence payloads.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Peer went online or offline (`user_status_change`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusChange {
    /// Peer whose status changed
    pub user_id: UserId,
    /// New status
    pub is_online: bool,
}
