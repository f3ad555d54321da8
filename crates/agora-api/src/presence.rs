use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use agora_types::api::PresenceResponse;

use crate::state::AppState;

/// Whether `user_id` has a live gateway connection on this node.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        user_id,
        online: state.registry.is_online(user_id),
    })
}
