use axum::{Json, extract::State};

use agora_types::api::HealthResponse;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        online: state.registry.online_count(),
    })
}
