//! Broadcast hub for dispatching gateway events to connected sessions.
//!
//! Uses a single `tokio::sync::broadcast` channel. Each connection
//! subscribes once and filters events locally against the payload's
//! recipient. This is efficient for the single-process gateway.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// Addressing for an outbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// Every connection subscribed to the room, sender included.
    Room(String),
    /// Every connection subscribed to the room except the named connection.
    RoomExceptSender(String, u64),
    /// The connections of one user (at most one, given presence eviction).
    User(String),
    /// One specific connection.
    Connection(u64),
    /// The operator monitoring group.
    Monitors,
    /// Every connection.
    All,
}

/// A payload broadcast to all connected sessions; each filters locally.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub recipient: Recipient,
    pub event: &'static str,
    pub data: Value,
}

/// The global broadcast hub. Cloneable — store in AppState.
#[derive(Clone)]
pub struct GatewayBroadcast {
    sender: broadcast::Sender<Arc<Outbound>>,
}

impl GatewayBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the broadcast channel. Each connection calls this once
    /// to get its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Outbound>> {
        self.sender.subscribe()
    }

    fn dispatch(&self, recipient: Recipient, event: &'static str, data: Value) {
        // send() returns Err if there are no receivers — that's fine.
        let _ = self.sender.send(Arc::new(Outbound {
            recipient,
            event,
            data,
        }));
    }

    /// Deliver to every connection subscribed to the room.
    pub fn to_room(&self, room_id: &str, event: &'static str, data: Value) {
        self.dispatch(Recipient::Room(room_id.to_string()), event, data);
    }

    /// Deliver to the room, excluding the sending connection.
    pub fn to_room_except(&self, room_id: &str, sender_conn: u64, event: &'static str, data: Value) {
        self.dispatch(
            Recipient::RoomExceptSender(room_id.to_string(), sender_conn),
            event,
            data,
        );
    }

    /// Deliver to a user's connection if online; silently no-ops otherwise.
    pub fn to_user(&self, user_id: &str, event: &'static str, data: Value) {
        self.dispatch(Recipient::User(user_id.to_string()), event, data);
    }

    /// Deliver to one specific connection.
    pub fn to_connection(&self, conn_id: u64, event: &'static str, data: Value) {
        self.dispatch(Recipient::Connection(conn_id), event, data);
    }

    /// Deliver to the operator monitoring group.
    pub fn to_monitors(&self, event: &'static str, data: Value) {
        self.dispatch(Recipient::Monitors, event, data);
    }

    /// Deliver to every connection.
    pub fn to_all(&self, event: &'static str, data: Value) {
        self.dispatch(Recipient::All, event, data);
    }
}

impl Default for GatewayBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_dispatched_payloads() {
        let hub = GatewayBroadcast::new();
        let mut rx = hub.subscribe();

        hub.to_room("r1", "message:new", serde_json::json!({"a": 1}));

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.recipient, Recipient::Room("r1".to_string()));
        assert_eq!(payload.event, "message:new");
        assert_eq!(payload.data["a"], 1);
    }

    #[tokio::test]
    async fn dispatch_without_receivers_does_not_panic() {
        let hub = GatewayBroadcast::new();
        hub.to_all("user:online", serde_json::json!("u1"));
    }

    #[tokio::test]
    async fn ordering_is_preserved_per_receiver() {
        let hub = GatewayBroadcast::new();
        let mut rx = hub.subscribe();

        hub.to_user("u1", "call:incoming", serde_json::json!(1));
        hub.to_monitors("call:started", serde_json::json!(2));

        assert_eq!(rx.recv().await.unwrap().data, 1);
        assert_eq!(rx.recv().await.unwrap().data, 2);
    }
}
