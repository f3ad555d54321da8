//! Write-side row types and the table mapping for aggregate entities.
//! Read queries hand back `agora-types` models directly.
use agora_types::models::{Counter, EntityTarget, NotificationKey, NotificationKind};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A notification about to be written. Its key decides which unique index
/// an insert conflicts on.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub reference_id: Option<Uuid>,
    pub content: String,
    pub seen: bool,
    /// When the underlying event happened. Stored as `created_at`; a write
    /// older than the stored row never replaces it.
    pub occurred_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn key(&self) -> NotificationKey {
        match self.reference_id {
            Some(reference_id) => NotificationKey::Reference {
                kind: self.kind,
                reference_id,
            },
            None => NotificationKey::Conversation {
                kind: self.kind,
                sender_id: self.sender_id,
                recipient_id: self.recipient_id,
            },
        }
    }
}

pub(crate) fn entity_table(target: EntityTarget) -> &'static str {
    match target {
        EntityTarget::Publication => "publications",
        EntityTarget::Comment => "comments",
        EntityTarget::Short => "shorts",
        EntityTarget::ShortComment => "short_comments",
        EntityTarget::Story => "stories",
    }
}

pub(crate) fn counter_column(counter: Counter) -> &'static str {
    match counter {
        Counter::Likes => "like_count",
        Counter::Comments => "comment_count",
    }
}
