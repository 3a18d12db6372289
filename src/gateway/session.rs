//! Per-connection session state.

use std::collections::HashSet;

use crate::auth::tokens::Identity;

use super::fanout::Recipient;

/// State for a single WebSocket connection.
///
/// Owned by the connection task; the joined-room set is only touched from
/// there. Room subscriptions die with the connection and are re-derived on
/// each `room:join` after a reconnect.
pub struct ConnSession {
    pub conn_id: u64,
    pub identity: Identity,
    rooms: HashSet<String>,
}

impl ConnSession {
    pub fn new(conn_id: u64, identity: Identity) -> Self {
        Self {
            conn_id,
            identity,
            rooms: HashSet::new(),
        }
    }

    pub fn join_room(&mut self, room_id: &str) {
        self.rooms.insert(room_id.to_string());
    }

    pub fn leave_room(&mut self, room_id: &str) {
        self.rooms.remove(room_id);
    }

    /// Whether this connection has successfully joined the room.
    pub fn in_room(&self, room_id: &str) -> bool {
        self.rooms.contains(room_id)
    }

    /// Whether a broadcast payload addressed to `recipient` should be
    /// delivered on this connection.
    pub fn should_receive(&self, recipient: &Recipient) -> bool {
        match recipient {
            Recipient::All => true,
            Recipient::Room(room) => self.rooms.contains(room),
            Recipient::RoomExceptSender(room, sender) => {
                *sender != self.conn_id && self.rooms.contains(room)
            }
            // Matched by identity, not the presence entry: an evicted
            // connection can still see user-targeted events until its
            // close frame lands in the connection loop.
            Recipient::User(user_id) => self.identity.user_id == *user_id,
            Recipient::Connection(conn_id) => *conn_id == self.conn_id,
            Recipient::Monitors => self.identity.is_operator,
        }
    }
}
