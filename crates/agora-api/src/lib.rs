pub mod health;
pub mod middleware;
pub mod notifications;
pub mod presence;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// HTTP routes other than the gateway upgrade.
pub fn routes(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health::health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/events", post(notifications::submit_event))
        .route("/presence/{user_id}", get(presence::get_presence))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
