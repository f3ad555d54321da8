use agora_types::models::NotificationKind;
use uuid::Uuid;

/// Why an inbound frame was dropped. None of these close the connection.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown frame type")]
    UnknownKind,

    #[error("chat message has no content and no attachments")]
    EmptyMessage,

    #[error("frame claims sender {claimed} but connection belongs to {actual}")]
    SenderMismatch { claimed: Uuid, actual: Uuid },

    #[error("no accepted friendship between {sender} and {recipient}")]
    FriendshipNotFound { sender: Uuid, recipient: Uuid },

    #[error("recipient {0} is not connected")]
    RecipientUnreachable(Uuid),

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn category(&self) -> &'static str {
        match self {
            Self::Malformed(_)
            | Self::UnknownKind
            | Self::EmptyMessage
            | Self::SenderMismatch { .. } => "validation",
            Self::FriendshipNotFound { .. } => "not_found",
            Self::RecipientUnreachable(_) => "unreachable_recipient",
            Self::Persistence(_) => "persistence",
        }
    }
}

/// Why a notification event was not written.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{0} notification requires a reference_id")]
    MissingReference(NotificationKind),

    #[error("{kind} notification references missing entity {reference_id}")]
    EntityNotFound {
        kind: NotificationKind,
        reference_id: Uuid,
    },

    #[error("{0} notifications are not implemented")]
    NotImplemented(NotificationKind),

    #[error("unsupported notification type")]
    UnsupportedKind,

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl ReconcileError {
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingReference(_) => "validation",
            Self::EntityNotFound { .. } => "not_found",
            Self::NotImplemented(_) | Self::UnsupportedKind => "not_implemented",
            Self::Persistence(_) => "persistence",
        }
    }
}
