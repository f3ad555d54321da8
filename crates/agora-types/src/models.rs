use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Blocked,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Friendship {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub addressee_id: Uuid,
    pub status: FriendshipStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Seen => "seen",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "seen" => Some(Self::Seen),
            _ => None,
        }
    }
}

/// A persisted direct message between two friends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub friendship_id: Uuid,
    pub content: String,
    pub images: Vec<String>,
    pub files: Vec<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kinds of notification the reconciler knows about.
///
/// Aggregatable kinds point at a countable entity through `reference_id` and
/// collapse into one row per entity. `Message` collapses per sender/recipient
/// pair. `Call` and `Live` are declared but have no handler yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Message,
    Like,
    Comment,
    LikeComment,
    LikeShort,
    CommentShort,
    LikeShortComment,
    LikeStory,
    Call,
    Live,
    #[serde(other)]
    Unknown,
}

/// Entity table an aggregatable notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTarget {
    Publication,
    Comment,
    Short,
    ShortComment,
    Story,
}

/// Which aggregate counter of the entity becomes the notification content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Likes,
    Comments,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "MESSAGE",
            Self::Like => "LIKE",
            Self::Comment => "COMMENT",
            Self::LikeComment => "LIKE_COMMENT",
            Self::LikeShort => "LIKE_SHORT",
            Self::CommentShort => "COMMENT_SHORT",
            Self::LikeShortComment => "LIKE_SHORT_COMMENT",
            Self::LikeStory => "LIKE_STORY",
            Self::Call => "CALL",
            Self::Live => "LIVE",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "MESSAGE" => Self::Message,
            "LIKE" => Self::Like,
            "COMMENT" => Self::Comment,
            "LIKE_COMMENT" => Self::LikeComment,
            "LIKE_SHORT" => Self::LikeShort,
            "COMMENT_SHORT" => Self::CommentShort,
            "LIKE_SHORT_COMMENT" => Self::LikeShortComment,
            "LIKE_STORY" => Self::LikeStory,
            "CALL" => Self::Call,
            "LIVE" => Self::Live,
            _ => Self::Unknown,
        }
    }

    /// The entity and counter backing an aggregatable kind, `None` otherwise.
    pub fn aggregate(&self) -> Option<(EntityTarget, Counter)> {
        match self {
            Self::Like => Some((EntityTarget::Publication, Counter::Likes)),
            Self::Comment => Some((EntityTarget::Publication, Counter::Comments)),
            Self::LikeComment => Some((EntityTarget::Comment, Counter::Likes)),
            Self::LikeShort => Some((EntityTarget::Short, Counter::Likes)),
            Self::CommentShort => Some((EntityTarget::Short, Counter::Comments)),
            Self::LikeShortComment => Some((EntityTarget::ShortComment, Counter::Likes)),
            Self::LikeStory => Some((EntityTarget::Story, Counter::Likes)),
            Self::Message | Self::Call | Self::Live | Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub reference_id: Option<Uuid>,
    pub content: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

/// Dedup identity of a notification row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKey {
    /// Aggregatable kinds: one row per referenced entity.
    Reference {
        kind: NotificationKind,
        reference_id: Uuid,
    },
    /// Message kind: one row per sender/recipient pair.
    Conversation {
        kind: NotificationKind,
        sender_id: Uuid,
        recipient_id: Uuid,
    },
}

/// Current owner and counter of the entity behind an aggregatable notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySnapshot {
    pub owner_id: Uuid,
    pub aggregate_count: i64,
}
