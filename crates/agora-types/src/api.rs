use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Notification, NotificationKind};

// -- JWT Claims --

/// JWT claims shared by the gateway cookie authenticator and the bearer
/// middleware of the HTTP routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Notifications --

/// A side-effect event (like, comment, message, ...) submitted for
/// reconciliation into the notification feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    #[serde(default)]
    pub reference_id: Option<Uuid>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub seen: bool,
    /// When the underlying action happened. Orders competing writes for the
    /// same notification; defaults to the time the event is received.
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub reference_id: Option<Uuid>,
    pub content: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            kind: n.kind,
            sender_id: n.sender_id,
            recipient_id: n.recipient_id,
            reference_id: n.reference_id,
            content: n.content,
            seen: n.seen,
            created_at: n.created_at,
        }
    }
}

// -- Presence --

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub user_id: Uuid,
    pub online: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub online: usize,
}
