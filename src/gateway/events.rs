//! Wire format: the client event vocabulary and server event names.
//!
//! Frames are JSON text messages of the shape `{"event": <name>, "data": <payload>}`.
//! Payload fields use the client's camelCase convention.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Client → Server events
// ---------------------------------------------------------------------------

/// The closed set of events a client may send.
///
/// Unknown event names or malformed payloads fail deserialization and are
/// dropped by the connection loop; they never close the connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "room:join")]
    RoomJoin(String),
    #[serde(rename = "room:leave")]
    RoomLeave(String),
    /// Arbitrary message body; the gateway only reads `roomId` and stamps
    /// the server-assigned fields before fanout.
    #[serde(rename = "message:send")]
    MessageSend(Value),
    #[serde(rename = "message:typing")]
    MessageTyping(String),
    #[serde(rename = "message:read")]
    #[serde(rename_all = "camelCase")]
    MessageRead { message_id: String, room_id: String },
    #[serde(rename = "call:initiate")]
    #[serde(rename_all = "camelCase")]
    CallInitiate { callee_id: String },
    #[serde(rename = "call:accept")]
    #[serde(rename_all = "camelCase")]
    CallAccept { log_id: String },
    #[serde(rename = "call:end")]
    #[serde(rename_all = "camelCase")]
    CallEnd { log_id: String },
    #[serde(rename = "call:reject")]
    #[serde(rename_all = "camelCase")]
    CallReject { log_id: String },
    #[serde(rename = "call:terminate")]
    #[serde(rename_all = "camelCase")]
    CallTerminate { log_id: String },
    /// Opaque WebRTC signaling payload; never parsed.
    #[serde(rename = "call:signal")]
    #[serde(rename_all = "camelCase")]
    CallSignal { target_user_id: String, signal: Value },
}

// ---------------------------------------------------------------------------
// Server → Client events
// ---------------------------------------------------------------------------

/// A message sent from the server to a client.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

/// Server event names.
pub struct EventName;

impl EventName {
    pub const USER_ONLINE: &'static str = "user:online";
    pub const USER_OFFLINE: &'static str = "user:offline";
    pub const SESSION_EVICTED: &'static str = "session:evicted";
    pub const MESSAGE_NEW: &'static str = "message:new";
    pub const MESSAGE_TYPING: &'static str = "message:typing";
    pub const MESSAGE_READ: &'static str = "message:read";
    pub const CALL_INCOMING: &'static str = "call:incoming";
    pub const CALL_ACCEPTED: &'static str = "call:accepted";
    pub const CALL_ENDED: &'static str = "call:ended";
    pub const CALL_ERROR: &'static str = "call:error";
    pub const CALL_SIGNAL: &'static str = "call:signal";
    pub const CALL_STARTED: &'static str = "call:started";
    pub const CALL_UPDATED: &'static str = "call:updated";
    pub const ADMIN_ONLINE_COUNT: &'static str = "admin:onlineCount";
    pub const ERROR: &'static str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ClientEvent {
        serde_json::from_str(raw).expect("parse client event")
    }

    #[test]
    fn parses_room_events() {
        assert!(matches!(
            parse(r#"{"event":"room:join","data":"r1"}"#),
            ClientEvent::RoomJoin(r) if r == "r1"
        ));
        assert!(matches!(
            parse(r#"{"event":"room:leave","data":"r1"}"#),
            ClientEvent::RoomLeave(r) if r == "r1"
        ));
    }

    #[test]
    fn parses_message_events() {
        let event = parse(r#"{"event":"message:send","data":{"roomId":"r1","content":"hi"}}"#);
        match event {
            ClientEvent::MessageSend(data) => assert_eq!(data["roomId"], "r1"),
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(
            parse(r#"{"event":"message:typing","data":"r1"}"#),
            ClientEvent::MessageTyping(r) if r == "r1"
        ));

        let event = parse(r#"{"event":"message:read","data":{"messageId":"m1","roomId":"r1"}}"#);
        match event {
            ClientEvent::MessageRead { message_id, room_id } => {
                assert_eq!(message_id, "m1");
                assert_eq!(room_id, "r1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_call_events() {
        assert!(matches!(
            parse(r#"{"event":"call:initiate","data":{"calleeId":"u2"}}"#),
            ClientEvent::CallInitiate { callee_id } if callee_id == "u2"
        ));
        assert!(matches!(
            parse(r#"{"event":"call:accept","data":{"logId":"call-1"}}"#),
            ClientEvent::CallAccept { log_id } if log_id == "call-1"
        ));
        assert!(matches!(
            parse(r#"{"event":"call:terminate","data":{"logId":"call-1"}}"#),
            ClientEvent::CallTerminate { log_id } if log_id == "call-1"
        ));

        let event =
            parse(r#"{"event":"call:signal","data":{"targetUserId":"u2","signal":{"sdp":"x"}}}"#);
        match event {
            ClientEvent::CallSignal { target_user_id, signal } => {
                assert_eq!(target_user_id, "u2");
                assert_eq!(signal["sdp"], "x");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event_names() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"nope","data":1}"#).is_err());
    }

    #[test]
    fn server_event_wire_shape() {
        let event = ServerEvent::new(EventName::USER_ONLINE, serde_json::json!("u1"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "user:online");
        assert_eq!(json["data"], "u1");
    }
}
