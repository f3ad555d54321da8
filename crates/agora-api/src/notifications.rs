use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::{error, warn};

use agora_types::api::{Claims, NotificationEvent, NotificationResponse};

use crate::state::AppState;

const MAX_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Accept a side-effect event for reconciliation. The caller only learns that
/// the event was queued; reconciliation failures end up in the log.
pub async fn submit_event(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(event): Json<NotificationEvent>,
) -> StatusCode {
    if event.sender_id != claims.sub {
        warn!(
            "{} ({}) submitted a {} event for sender {}",
            claims.username, claims.sub, event.kind, event.sender_id
        );
        return StatusCode::FORBIDDEN;
    }

    state.reconciler.spawn(event);
    StatusCode::ACCEPTED
}

/// The caller's notification feed, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<NotificationResponse>>, StatusCode> {
    let limit = query.limit.clamp(1, MAX_LIMIT);

    let db = state.db.clone();
    let recipient_id = claims.sub;
    let notifications =
        tokio::task::spawn_blocking(move || db.list_notifications(recipient_id, limit))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .map_err(|e| {
                error!("Failed to list notifications for {}: {}", recipient_id, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

    Ok(Json(notifications.into_iter().map(NotificationResponse::from).collect()))
}
