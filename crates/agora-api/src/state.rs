use std::sync::Arc;

use agora_db::Database;
use agora_gateway::auth::SessionAuthenticator;
use agora_gateway::connection::GatewaySettings;
use agora_gateway::dispatcher::FrameDispatcher;
use agora_gateway::mirror::PresenceMirror;
use agora_gateway::reconciler::NotificationReconciler;
use agora_gateway::registry::PresenceRegistry;

pub type AppState = Arc<AppStateInner>;

/// Everything the HTTP handlers and the gateway upgrade share.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub registry: PresenceRegistry,
    pub reconciler: NotificationReconciler,
    pub dispatcher: FrameDispatcher,
    pub authenticator: SessionAuthenticator,
    pub gateway: GatewaySettings,
}

impl AppStateInner {
    /// Wire the gateway components around one database and mirror.
    pub fn new(
        db: Arc<Database>,
        jwt_secret: String,
        cookie_name: String,
        mirror: PresenceMirror,
        gateway: GatewaySettings,
    ) -> AppState {
        let registry = PresenceRegistry::new(mirror);
        let reconciler = NotificationReconciler::new(db.clone());
        let dispatcher = FrameDispatcher::new(db.clone(), registry.clone(), reconciler.clone());
        let authenticator = SessionAuthenticator::new(db.clone(), jwt_secret.clone(), cookie_name);

        Arc::new(Self {
            db,
            jwt_secret,
            registry,
            reconciler,
            dispatcher,
            authenticator,
            gateway,
        })
    }
}
