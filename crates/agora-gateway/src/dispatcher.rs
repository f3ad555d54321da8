use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use agora_db::Database;
use agora_types::api::NotificationEvent;
use agora_types::events::{
    CallInvite, CallRelay, ChatFrame, ChatPayload, FrameKind, InboundFrame, OutboundFrame,
};
use agora_types::models::{Friendship, Message, MessageStatus, NotificationKind};

use crate::auth::Principal;
use crate::error::DispatchError;
use crate::reconciler::NotificationReconciler;
use crate::registry::{ConnectionHandle, PresenceRegistry};

/// What a successfully handled frame did.
#[derive(Debug)]
pub enum FrameOutcome {
    Chat {
        message_id: Uuid,
        delivered_live: bool,
        /// Background reconciliation of the message notification. Callers
        /// never need to await it; tests do.
        notification: JoinHandle<()>,
    },
    CallRelayed {
        recipient_id: Uuid,
    },
}

/// Routes inbound frames from one connection to persistence, the registry
/// and the notification reconciler.
#[derive(Clone)]
pub struct FrameDispatcher {
    db: Arc<Database>,
    registry: PresenceRegistry,
    reconciler: NotificationReconciler,
}

impl FrameDispatcher {
    pub fn new(
        db: Arc<Database>,
        registry: PresenceRegistry,
        reconciler: NotificationReconciler,
    ) -> Self {
        Self {
            db,
            registry,
            reconciler,
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Handle one raw text frame sent by `principal`. Acknowledgements go to
    /// `reply`. Every error is per-frame: the caller logs it and keeps reading.
    pub async fn dispatch(
        &self,
        principal: &Principal,
        reply: &ConnectionHandle,
        raw: &str,
    ) -> Result<FrameOutcome, DispatchError> {
        match serde_json::from_str::<InboundFrame>(raw)? {
            InboundFrame::Chat(frame) => self.handle_chat(principal, reply, frame).await,
            InboundFrame::VideoInvite(invite) => {
                self.relay_invite(principal, FrameKind::VideoInvite, invite)
            }
            InboundFrame::VoiceInvite(invite) => {
                self.relay_invite(principal, FrameKind::VoiceInvite, invite)
            }
            InboundFrame::Unknown => Err(DispatchError::UnknownKind),
        }
    }

    async fn handle_chat(
        &self,
        principal: &Principal,
        reply: &ConnectionHandle,
        frame: ChatFrame,
    ) -> Result<FrameOutcome, DispatchError> {
        check_sender(principal, frame.sender)?;
        if frame.content.is_empty() && !frame.has_attachments() {
            return Err(DispatchError::EmptyMessage);
        }

        let friendship = self
            .find_friendship(frame.sender, frame.recipient)
            .await?
            .ok_or(DispatchError::FriendshipNotFound {
                sender: frame.sender,
                recipient: frame.recipient,
            })?;

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: frame.sender,
            recipient_id: frame.recipient,
            friendship_id: friendship.id,
            content: frame.content,
            images: frame.images,
            files: frame.files,
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
        };

        let db = self.db.clone();
        let message = tokio::task::spawn_blocking(move || {
            db.insert_message(&message)?;
            Ok::<_, anyhow::Error>(message)
        })
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;

        let payload = ChatPayload::from(&message);
        if !reply.send(OutboundFrame::Chat(payload.clone())) {
            debug!(message_id = %message.id, "Sender left before acknowledgement");
        }

        // Look up, then send with the registry lock already released.
        let delivered_live = match self.registry.lookup(message.recipient_id) {
            Some(handle) => handle.send(OutboundFrame::Chat(payload)),
            None => false,
        };

        debug!(
            message_id = %message.id,
            recipient_id = %message.recipient_id,
            delivered_live,
            "Chat message stored"
        );

        // A notification is written whether or not the recipient saw the
        // message live; liveness only decides its seen flag.
        let notification = self.reconciler.spawn(NotificationEvent {
            kind: NotificationKind::Message,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            reference_id: None,
            content: message.content.clone(),
            seen: delivered_live,
            occurred_at: message.created_at,
        });

        Ok(FrameOutcome::Chat {
            message_id: message.id,
            delivered_live,
            notification,
        })
    }

    fn relay_invite(
        &self,
        principal: &Principal,
        kind: FrameKind,
        invite: CallInvite,
    ) -> Result<FrameOutcome, DispatchError> {
        check_sender(principal, invite.sender)?;

        let handle = self
            .registry
            .lookup(invite.recipient)
            .ok_or(DispatchError::RecipientUnreachable(invite.recipient))?;

        let relay = CallRelay {
            kind,
            room_id: invite.room,
            sender_id: invite.sender,
            recipient_id: invite.recipient,
            date: Utc::now(),
        };
        if !handle.send(OutboundFrame::Call(relay)) {
            return Err(DispatchError::RecipientUnreachable(invite.recipient));
        }

        info!(
            "{} relayed {} to {} (room {})",
            principal.username,
            kind.as_str(),
            invite.recipient,
            invite.room
        );
        Ok(FrameOutcome::CallRelayed {
            recipient_id: invite.recipient,
        })
    }

    async fn find_friendship(
        &self,
        sender: Uuid,
        recipient: Uuid,
    ) -> Result<Option<Friendship>, DispatchError> {
        let db = self.db.clone();
        let friendship = tokio::task::spawn_blocking(move || db.get_friendship(sender, recipient))
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;
        Ok(friendship)
    }
}

fn check_sender(principal: &Principal, claimed: Uuid) -> Result<(), DispatchError> {
    if claimed != principal.user_id {
        return Err(DispatchError::SenderMismatch {
            claimed,
            actual: principal.user_id,
        });
    }
    Ok(())
}

/// Log a dropped frame at a level matching how surprising the failure is.
pub fn log_dropped(principal: &Principal, err: &DispatchError) {
    match err {
        DispatchError::Persistence(_) => error!(
            user_id = %principal.user_id,
            category = err.category(),
            "{} frame dropped: {}",
            principal.username,
            err
        ),
        _ => warn!(
            user_id = %principal.user_id,
            category = err.category(),
            "{} frame dropped: {}",
            principal.username,
            err
        ),
    }
}
