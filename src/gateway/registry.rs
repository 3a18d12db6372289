//! Presence tracking: which users currently hold an open connection.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Maps an authenticated user to their single live connection.
///
/// Invariant: at most one entry per user. A reconnect evicts the prior
/// connection; the caller notifies and closes the evicted side.
pub struct PresenceRegistry {
    online: DashMap<String, u64>,
    next_conn_id: AtomicU64,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            online: DashMap::new(),
            next_conn_id: AtomicU64::new(0),
        }
    }

    /// Allocate a process-unique connection id.
    pub fn allocate_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Mark a user online. Returns the evicted connection id when the user
    /// already had a live connection.
    pub fn mark_online(&self, user_id: &str, conn_id: u64) -> Option<u64> {
        self.online.insert(user_id.to_string(), conn_id)
    }

    /// Mark a user offline, but only if `conn_id` still owns the entry.
    ///
    /// An evicted connection's late disconnect must not remove the entry of
    /// the connection that replaced it. Returns whether anything was removed.
    pub fn mark_offline(&self, user_id: &str, conn_id: u64) -> bool {
        self.online
            .remove_if(user_id, |_, stored| *stored == conn_id)
            .is_some()
    }

    /// Current number of online users.
    pub fn count(&self) -> usize {
        self.online.len()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains_key(user_id)
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_ids_are_unique_and_nonzero() {
        let reg = PresenceRegistry::new();
        let a = reg.allocate_conn_id();
        let b = reg.allocate_conn_id();
        assert!(a > 0);
        assert_ne!(a, b);
    }

    #[test]
    fn mark_online_tracks_user() {
        let reg = PresenceRegistry::new();
        assert!(reg.mark_online("u1", 1).is_none());
        assert!(reg.is_online("u1"));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn reconnect_evicts_prior_connection() {
        let reg = PresenceRegistry::new();
        reg.mark_online("u1", 1);
        let evicted = reg.mark_online("u1", 2);
        assert_eq!(evicted, Some(1));
        // Still one entry per user.
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn mark_offline_requires_owning_conn_id() {
        let reg = PresenceRegistry::new();
        reg.mark_online("u1", 1);
        reg.mark_online("u1", 2);

        // The evicted connection cannot remove its successor's entry.
        assert!(!reg.mark_offline("u1", 1));
        assert!(reg.is_online("u1"));

        assert!(reg.mark_offline("u1", 2));
        assert!(!reg.is_online("u1"));
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn count_tracks_distinct_users() {
        let reg = PresenceRegistry::new();
        reg.mark_online("u1", 1);
        reg.mark_online("u2", 2);
        assert_eq!(reg.count(), 2);
        reg.mark_offline("u1", 1);
        assert_eq!(reg.count(), 1);
    }
}
