use serde::{Deserialize, Serialize};

// Client -> Server opcodes
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_SUBSCRIBE: u8 = 3;
pub const OP_UNSUBSCRIBE: u8 = 4;

// Server -> Client opcodes
pub const OP_DISPATCH: u8 = 0;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

// Dispatch event names
pub const EVENT_READY: &str = "READY";
pub const EVENT_SUBSCRIBED: &str = "SUBSCRIBED";
pub const EVENT_SUBSCRIBE_DENIED: &str = "SUBSCRIBE_DENIED";
pub const EVENT_UNSUBSCRIBED: &str = "UNSUBSCRIBED";

// Session events
pub const EVENT_SESSION_ENDED: &str = "SESSION_ENDED";

// Participant events: one event name, the payload carries the new status.
pub const EVENT_PARTICIPANT_UPDATED: &str = "PARTICIPANT_UPDATED";

// Message events
pub const EVENT_MESSAGE_CREATE: &str = "MESSAGE_CREATE";
pub const EVENT_MESSAGE_DELETE: &str = "MESSAGE_DELETE";

// WebRTC signaling relay (targeted, fire-and-forget)
pub const EVENT_SIGNAL: &str = "SIGNAL";
