use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Wire tag carried in the `type` field of every real-time frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    #[serde(rename = "message")]
    Chat,
    #[serde(rename = "video-call-invite")]
    VideoInvite,
    #[serde(rename = "voice-call-invite")]
    VoiceInvite,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "message",
            Self::VideoInvite => "video-call-invite",
            Self::VoiceInvite => "voice-call-invite",
        }
    }
}

/// Frames sent FROM client TO server over the gateway.
///
/// Any `type` not listed here lands in `Unknown` so the connection can log
/// and drop it instead of treating it as malformed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundFrame {
    #[serde(rename = "message")]
    Chat(ChatFrame),

    #[serde(rename = "video-call-invite")]
    VideoInvite(CallInvite),

    #[serde(rename = "voice-call-invite")]
    VoiceInvite(CallInvite),

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatFrame {
    pub sender: Uuid,
    pub recipient: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl ChatFrame {
    pub fn has_attachments(&self) -> bool {
        !self.images.is_empty() || !self.files.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallInvite {
    pub room: Uuid,
    pub sender: Uuid,
    pub recipient: Uuid,
}

/// Frames sent FROM server TO client.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    /// Acknowledgement to the sender and live delivery to the recipient share
    /// the same payload.
    Chat(ChatPayload),

    /// Call invitation relayed to the callee only.
    Call(CallRelay),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content: String,
    pub sender_id: Uuid,
    pub files: Vec<String>,
    pub images: Vec<String>,
    pub message_id: Uuid,
    pub recipient_id: Uuid,
    pub friendship_id: Uuid,
}

impl From<&Message> for ChatPayload {
    fn from(message: &Message) -> Self {
        Self {
            kind: FrameKind::Chat,
            edited: false,
            created_at: message.created_at,
            updated_at: message.updated_at,
            content: message.content.clone(),
            sender_id: message.sender_id,
            files: message.files.clone(),
            images: message.images.clone(),
            message_id: message.id,
            recipient_id: message.recipient_id,
            friendship_id: message.friendship_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRelay {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub date: DateTime<Utc>,
}
