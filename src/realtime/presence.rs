//! In-memory presence registry: user id → current connection id.
//!
//! At most one connection id is recorded per user. A second login overwrites
//! the entry (what happens to the evicted connection is the server's call, see
//! `MultiLoginPolicy`). Only the connection lifecycle handlers mutate this
//! map; the fan-out router just reads it.

use dashmap::DashMap;

use crate::store::UserId;

/// Thread-safe registry of which users are currently reachable.
pub struct PresenceRegistry {
    inner: DashMap<UserId, String>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Record `connection_id` as the user's live connection. Overwrites any
    /// prior entry; returns the evicted connection id if one was replaced.
    pub fn register(&self, user_id: UserId, connection_id: &str) -> Option<String> {
        self.inner
            .insert(user_id, connection_id.to_string())
            .filter(|prev| prev != connection_id)
    }

    /// Current connection id for the user, if any.
    pub fn lookup(&self, user_id: UserId) -> Option<String> {
        self.inner.get(&user_id).map(|entry| entry.clone())
    }

    /// Remove the user's entry. Removing an absent entry is a no-op.
    pub fn remove(&self, user_id: UserId) {
        self.inner.remove(&user_id);
    }

    /// Remove the entry only if it still points at `connection_id`. Returns
    /// whether the entry was removed, i.e. whether the user actually went
    /// offline. Keeps a replaced connection's disconnect from evicting its
    /// successor.
    pub fn remove_if(&self, user_id: UserId, connection_id: &str) -> bool {
        self.inner
            .remove_if(&user_id, |_, current| current == connection_id)
            .is_some()
    }

    /// Number of users currently registered.
    pub fn online_count(&self) -> usize {
        self.inner.len()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
