pub mod config;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use agora_api::state::AppState;
use agora_gateway::connection;

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = concat!(
    "info,agora=debug,agora_server=debug,agora_db=debug,",
    "agora_gateway=debug,agora_api=debug,tower_http=debug"
);

/// Full application router: the gateway upgrade plus the HTTP routes.
pub fn build_router(state: AppState) -> Router {
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(agora_api::routes(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Authentication happens after the upgrade so a rejected client still gets
/// a policy close frame instead of a bare HTTP error.
async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_upgraded(
            socket,
            headers,
            state.authenticator.clone(),
            state.dispatcher.clone(),
            state.gateway,
        )
    })
}
