//! Best-effort copy of presence into Redis for features that do not share
//! this process. Nothing here is authoritative; the registry is.

use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub user_id: Uuid,
    pub username: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOp {
    Set {
        user_id: Uuid,
        snapshot: PresenceSnapshot,
    },
    Del {
        user_id: Uuid,
    },
}

/// Sending side of the mirror. Publishing never blocks and never fails.
#[derive(Clone, Default)]
pub struct PresenceMirror {
    tx: Option<mpsc::UnboundedSender<MirrorOp>>,
}

impl PresenceMirror {
    /// A mirror that discards every update.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A mirror whose updates are read from the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MirrorOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Connect to Redis and spawn the task that applies updates there.
    pub async fn connect_redis(url: &str, ttl: Duration) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        let (mirror, rx) = Self::channel();
        tokio::spawn(run_redis_mirror(manager, rx, ttl));
        info!("Presence mirror connected to Redis");
        Ok(mirror)
    }

    pub fn publish(&self, op: MirrorOp) {
        if let Some(tx) = &self.tx {
            if tx.send(op).is_err() {
                debug!("Presence mirror task is gone, dropping update");
            }
        }
    }
}

pub fn presence_key(user_id: Uuid) -> String {
    format!("presence:{}", user_id)
}

async fn run_redis_mirror(
    mut conn: ConnectionManager,
    mut rx: mpsc::UnboundedReceiver<MirrorOp>,
    ttl: Duration,
) {
    while let Some(op) = rx.recv().await {
        let result: redis::RedisResult<()> = match &op {
            MirrorOp::Set { user_id, snapshot } => {
                let json = match serde_json::to_string(snapshot) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(%user_id, "Failed to encode presence snapshot: {}", e);
                        continue;
                    }
                };
                conn.set_ex(presence_key(*user_id), json, ttl.as_secs()).await
            }
            MirrorOp::Del { user_id } => conn.del(presence_key(*user_id)).await,
        };

        if let Err(e) = result {
            warn!("Presence mirror update failed ({:?}): {}", op, e);
        }
    }
    debug!("Presence mirror task stopped");
}
