//! Turns side-effect events into at most one notification row per key.
//!
//! The lookup-then-write below is not atomic. Two events for the same key
//! can both see "no row" and both insert; the partial unique indexes on
//! `notifications` turn the losing insert into an update of the winner's row.
//! A store without those indexes would end up with duplicates.
//!
//! Events for one key can also land out of order. Every write carries the
//! time the action happened and the store keeps the newest one, so a late
//! event never rolls the row back.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use agora_db::Database;
use agora_db::models::NewNotification;
use agora_types::api::NotificationEvent;
use agora_types::models::{NotificationKey, NotificationKind};

use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Inserted(Uuid),
    Updated(Uuid),
    /// The row already reflects a newer event; nothing was written.
    Superseded(Uuid),
}

impl Reconciled {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Inserted(id) | Self::Updated(id) | Self::Superseded(id) => *id,
        }
    }
}

#[derive(Clone)]
pub struct NotificationReconciler {
    db: Arc<Database>,
}

impl NotificationReconciler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn handle(&self, event: NotificationEvent) -> Result<Reconciled, ReconcileError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || reconcile(&db, event))
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
    }

    /// Reconcile in a background task. Failures are logged, never returned.
    pub fn spawn(&self, event: NotificationEvent) -> JoinHandle<()> {
        let reconciler = self.clone();
        tokio::spawn(async move {
            let kind = event.kind;
            let sender_id = event.sender_id;
            match reconciler.handle(event).await {
                Ok(outcome) => debug!(%kind, %sender_id, ?outcome, "Notification reconciled"),
                Err(e) => log_dropped(kind, sender_id, &e),
            }
        })
    }
}

pub fn log_dropped(kind: NotificationKind, sender_id: Uuid, err: &ReconcileError) {
    match err {
        ReconcileError::NotImplemented(_)
        | ReconcileError::UnsupportedKind
        | ReconcileError::Persistence(_) => {
            error!(%kind, %sender_id, category = err.category(), "Notification dropped: {}", err)
        }
        ReconcileError::MissingReference(_) | ReconcileError::EntityNotFound { .. } => {
            warn!(%kind, %sender_id, category = err.category(), "Notification dropped: {}", err)
        }
    }
}

fn reconcile(db: &Database, event: NotificationEvent) -> Result<Reconciled, ReconcileError> {
    match event.kind {
        NotificationKind::Like
        | NotificationKind::Comment
        | NotificationKind::LikeComment
        | NotificationKind::LikeShort
        | NotificationKind::CommentShort
        | NotificationKind::LikeShortComment
        | NotificationKind::LikeStory => reconcile_aggregate(db, event),
        NotificationKind::Message => reconcile_conversation(db, event),
        NotificationKind::Call | NotificationKind::Live => {
            Err(ReconcileError::NotImplemented(event.kind))
        }
        NotificationKind::Unknown => Err(ReconcileError::UnsupportedKind),
    }
}

/// The entity is authoritative: its owner receives the notification and its
/// current counter becomes the content, whatever the event said.
fn reconcile_aggregate(
    db: &Database,
    event: NotificationEvent,
) -> Result<Reconciled, ReconcileError> {
    let kind = event.kind;
    let reference_id = event
        .reference_id
        .ok_or(ReconcileError::MissingReference(kind))?;
    let entity = db
        .get_entity_for_notification(kind, reference_id)?
        .ok_or(ReconcileError::EntityNotFound { kind, reference_id })?;

    upsert(
        db,
        NotificationKey::Reference { kind, reference_id },
        NewNotification {
            kind,
            sender_id: event.sender_id,
            recipient_id: entity.owner_id,
            reference_id: Some(reference_id),
            content: entity.aggregate_count.to_string(),
            seen: event.seen,
            occurred_at: event.occurred_at,
        },
    )
}

fn reconcile_conversation(
    db: &Database,
    event: NotificationEvent,
) -> Result<Reconciled, ReconcileError> {
    upsert(
        db,
        NotificationKey::Conversation {
            kind: event.kind,
            sender_id: event.sender_id,
            recipient_id: event.recipient_id,
        },
        NewNotification {
            kind: event.kind,
            sender_id: event.sender_id,
            recipient_id: event.recipient_id,
            reference_id: None,
            content: event.content,
            seen: event.seen,
            occurred_at: event.occurred_at,
        },
    )
}

fn upsert(
    db: &Database,
    key: NotificationKey,
    notification: NewNotification,
) -> Result<Reconciled, ReconcileError> {
    if let Some(existing) = db.find_notification(&key)? {
        if existing.created_at > notification.occurred_at {
            return Ok(Reconciled::Superseded(existing.id));
        }
        let updated = db.update_notification(
            existing.id,
            &notification.content,
            notification.seen,
            notification.occurred_at,
        )?;
        if updated {
            return Ok(Reconciled::Updated(existing.id));
        }
        debug!(id = %existing.id, "Notification changed before update, merging by insert");
    }

    let id = db.insert_notification(&notification)?;
    Ok(Reconciled::Inserted(id))
}
