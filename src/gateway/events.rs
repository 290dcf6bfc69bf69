//! Gateway opcodes, event names, and wire-format messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::message::MessageKind;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_HEARTBEAT_ACK: u8 = 6;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build an `error` dispatch for the originating connection only.
    pub fn error(seq: u64, message: &str) -> Self {
        Self::dispatch(EventName::ERROR, seq, serde_json::json!({ "message": message }))
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Client action payloads (op=0 with an action name in `t`)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RoomActionPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub room_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReactPayload {
    pub message_id: String,
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct EditMessagePayload {
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessagePayload {
    pub message_id: String,
}

// ---------------------------------------------------------------------------
// Event and action names
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "ready";
    pub const NEW_MESSAGE: &'static str = "new-message";
    pub const MESSAGE_UPDATED: &'static str = "message-updated";
    pub const MESSAGE_DELETED: &'static str = "message-deleted";
    pub const MESSAGE_REACTION_UPDATED: &'static str = "message-reaction-updated";
    pub const ROOM_UPDATED: &'static str = "room-updated";
    pub const ROOM_JOINED: &'static str = "room-joined";
    pub const ROOM_LEFT: &'static str = "room-left";
    pub const USER_TYPING: &'static str = "user-typing";
    pub const USER_STOPPED_TYPING: &'static str = "user-stopped-typing";
    pub const PRESENCE_UPDATE: &'static str = "presence-update";
    pub const ERROR: &'static str = "error";
}

/// Action names accepted from clients.
pub struct ActionName;

impl ActionName {
    pub const JOIN_ROOM: &'static str = "join-room";
    pub const LEAVE_ROOM: &'static str = "leave-room";
    pub const SEND_MESSAGE: &'static str = "send-message";
    pub const TYPING_START: &'static str = "typing-start";
    pub const TYPING_STOP: &'static str = "typing-stop";
    pub const REACT_TO_MESSAGE: &'static str = "react-to-message";
    pub const EDIT_MESSAGE: &'static str = "edit-message";
    pub const DELETE_MESSAGE: &'static str = "delete-message";
}
