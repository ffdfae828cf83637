//! Presence tracking.
//!
//! The set of peers known to be online. It changes only on explicit
//! `user_status_change` events: silence is never read as offline, so a peer
//! whose device drops without a goodbye stays online until the server says
//! otherwise.

use std::collections::HashSet;

use parley_proto::UserId;

/// Peers currently known to be online.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    online: HashSet<UserId>,
}

impl PresenceTracker {
    /// Create a tracker with nobody online.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `peer` online. Returns true if this is news.
    pub fn set_online(&mut self, peer: &UserId) -> bool {
        self.online.insert(peer.clone())
    }

    /// Mark `peer` offline. Returns true if this is news.
    pub fn set_offline(&mut self, peer: &UserId) -> bool {
        self.online.remove(peer)
    }

    /// Apply a presence event. Returns true if state changed.
    pub fn apply(&mut self, peer: &UserId, is_online: bool) -> bool {
        if is_online { self.set_online(peer) } else { self.set_offline(peer) }
    }

    /// Whether `peer` is online.
    pub fn is_online(&self, peer: &UserId) -> bool {
        self.online.contains(peer)
    }

    /// Online peers, sorted.
    pub fn online_peers(&self) -> Vec<UserId> {
        let mut peers: Vec<UserId> = self.online.iter().cloned().collect();
        peers.sort();
        peers
    }

    /// Forget everyone. Used on logout.
    pub fn clear(&mut self) {
        self.online.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_events_only() {
        let mut presence = PresenceTracker::new();
        let u2 = UserId::from("u2");

        assert!(!presence.is_online(&u2));
        assert!(presence.apply(&u2, true));
        assert!(!presence.apply(&u2, true));
        assert!(presence.is_online(&u2));

        assert!(presence.set_offline(&u2));
        assert!(!presence.set_offline(&u2));
        assert!(!presence.is_online(&u2));
    }

    #[test]
    fn online_peers_are_sorted() {
        let mut presence = PresenceTracker::new();
        presence.set_online(&UserId::from("u3"));
        presence.set_online(&UserId::from("u2"));

        assert_eq!(presence.online_peers(), vec![UserId::from("u2"), UserId::from("u3")]);
        presence.clear();
        assert!(presence.online_peers().is_empty());
    }
}
