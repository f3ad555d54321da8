use std::sync::Arc;

use tracing::{info, warn};

use agora_api::state::AppStateInner;
use agora_db::Database;
use agora_gateway::mirror::PresenceMirror;
use agora_server::{DEFAULT_LOG_FILTER, build_router};
use agora_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);

    let mirror = match &config.redis_url {
        Some(url) => match PresenceMirror::connect_redis(url, config.presence_ttl).await {
            Ok(mirror) => mirror,
            Err(e) => {
                warn!("Presence mirror unavailable, continuing without it: {}", e);
                PresenceMirror::disabled()
            }
        },
        None => {
            info!("AGORA_REDIS_URL not set, presence mirror disabled");
            PresenceMirror::disabled()
        }
    };

    let state = AppStateInner::new(
        db,
        config.jwt_secret.clone(),
        config.auth_cookie.clone(),
        mirror,
        config.gateway,
    );
    let app = build_router(state);

    let addr = config.bind_addr()?;
    info!("Agora server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
