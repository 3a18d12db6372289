//! External directory lookups: room membership and private-room existence.
//!
//! Membership is authoritative in the message store, never cached long-term
//! by the gateway; every room-scoped action asks again. Lookup failures are
//! reported to the caller, which treats them as deny.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;

/// Failure talking to the backing directory.
#[derive(Debug)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "directory lookup failed: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Whether `user_id` is currently a member of `room_id`.
    async fn is_member(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError>;

    /// Whether a private (two-person) room already exists between the users.
    async fn private_room_exists(&self, user_a: &str, user_b: &str) -> Result<bool, StoreError>;
}

/// In-memory directory. Serves tests and local runs; replace with the
/// SQL-backed store once the message service exposes membership lookups.
#[derive(Default)]
pub struct MemoryDirectory {
    members: DashMap<String, HashSet<String>>,
    private_pairs: DashMap<(String, String), ()>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, room_id: &str, user_id: &str) {
        self.members
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn add_private_room(&self, user_a: &str, user_b: &str) {
        self.private_pairs.insert(pair_key(user_a, user_b), ());
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn is_member(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .members
            .get(room_id)
            .map(|m| m.contains(user_id))
            .unwrap_or(false))
    }

    async fn private_room_exists(&self, user_a: &str, user_b: &str) -> Result<bool, StoreError> {
        Ok(self.private_pairs.contains_key(&pair_key(user_a, user_b)))
    }
}

/// Order-insensitive key for a user pair.
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn is_member_checks_the_named_room() {
        let dir = MemoryDirectory::new();
        dir.add_member("r1", "u1");

        assert!(dir.is_member("u1", "r1").await.unwrap());
        assert!(!dir.is_member("u2", "r1").await.unwrap());
        assert!(!dir.is_member("u1", "r2").await.unwrap());
    }

    #[tokio::test]
    async fn private_room_lookup_is_order_insensitive() {
        let dir = MemoryDirectory::new();
        dir.add_private_room("alice", "bob");

        assert!(dir.private_room_exists("alice", "bob").await.unwrap());
        assert!(dir.private_room_exists("bob", "alice").await.unwrap());
        assert!(!dir.private_room_exists("alice", "carol").await.unwrap());
    }
}
