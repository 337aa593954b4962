use serde::{Deserialize, Serialize};

/// Delivery mode of a session: plain text messaging or a WebRTC audio room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Audio,
    Message,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Message => "message",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "audio" => Some(Self::Audio),
            "message" => Some(Self::Message),
            _ => None,
        }
    }
}
