use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::auth::{Principal, SessionAuthenticator};
use crate::dispatcher::{self, FrameDispatcher};
use crate::registry::{ConnectionHandle, PresenceRegistry};

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// The server pings this often. Two unanswered pings drop the connection.
    pub heartbeat_interval: Duration,
    /// Longest a client may go without sending a text or binary frame.
    /// Heartbeat traffic does not count as activity.
    pub idle_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Entry point for a freshly upgraded socket. `headers` are the handshake
/// headers the session cookie is read from.
pub async fn handle_upgraded(
    mut socket: WebSocket,
    headers: HeaderMap,
    authenticator: SessionAuthenticator,
    dispatcher: FrameDispatcher,
    settings: GatewaySettings,
) {
    let principal = match authenticator.authenticate(&headers).await {
        Ok(principal) => principal,
        Err(e) => {
            warn!("Rejecting gateway connection: {}", e);
            let close = Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "authentication failed".into(),
            }));
            if let Err(e) = socket.send(close).await {
                debug!("Failed to send policy close: {}", e);
            }
            return;
        }
    };

    run_connection(socket, principal, dispatcher, settings).await;
}

/// Removes the connection from the registry and stops its tasks when the
/// connection future finishes, however it finishes.
struct Registration {
    registry: PresenceRegistry,
    user_id: Uuid,
    conn_id: Uuid,
    tasks: Vec<AbortHandle>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.registry.unregister_connection(self.user_id, self.conn_id);
    }
}

async fn run_connection(
    socket: WebSocket,
    principal: Principal,
    dispatcher: FrameDispatcher,
    settings: GatewaySettings,
) {
    let (handle, mut outbound_rx) = ConnectionHandle::channel();
    let conn_id = handle.conn_id();
    let user_id = principal.user_id;

    let registry = dispatcher.registry().clone();
    if let Some(previous) = registry.register(user_id, principal.username.clone(), handle.clone()) {
        info!(
            "{} ({}) reconnected, superseding connection {}",
            principal.username,
            user_id,
            previous.handle.conn_id()
        );
    }
    let mut registration = Registration {
        registry,
        user_id,
        conn_id,
        tasks: Vec::with_capacity(2),
    };

    info!("{} ({}) connected to gateway", principal.username, user_id);

    let (mut sender, mut receiver) = socket.split();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode outbound frame: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_principal = principal.clone();
    let mut recv_task = tokio::spawn(async move {
        let principal = recv_principal;
        let mut idle_deadline = Instant::now() + settings.idle_timeout;
        loop {
            let msg = match tokio::time::timeout_at(idle_deadline, receiver.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    debug!("{} ({}) transport error: {}", principal.username, principal.user_id, e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    info!(
                        "{} ({}) idle for {:?}, closing",
                        principal.username, principal.user_id, settings.idle_timeout
                    );
                    break;
                }
            };

            match msg {
                // Frames from one connection are handled strictly in order.
                Message::Text(text) => {
                    idle_deadline = Instant::now() + settings.idle_timeout;
                    match dispatcher.dispatch(&principal, &handle, text.as_str()).await {
                        Ok(outcome) => trace!(?outcome, "Frame handled"),
                        Err(e) => dispatcher::log_dropped(&principal, &e),
                    }
                }
                Message::Binary(data) => {
                    idle_deadline = Instant::now() + settings.idle_timeout;
                    warn!(
                        "{} ({}) sent a {} byte binary frame, dropping",
                        principal.username,
                        principal.user_id,
                        data.len()
                    );
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Ping(_) => {}
            }
        }
    });

    registration.tasks.push(send_task.abort_handle());
    registration.tasks.push(recv_task.abort_handle());

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    drop(registration);
    info!("{} ({}) disconnected from gateway", principal.username, user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::PresenceMirror;

    #[test]
    fn default_settings() {
        let settings = GatewaySettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(settings.idle_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn dropping_registration_unregisters_and_stops_tasks() {
        let registry = PresenceRegistry::new(PresenceMirror::disabled());
        let user_id = Uuid::new_v4();
        let (handle, _rx) = ConnectionHandle::channel();
        let conn_id = handle.conn_id();
        registry.register(user_id, "alice".into(), handle);

        let task = tokio::spawn(std::future::pending::<()>());
        let registration = Registration {
            registry: registry.clone(),
            user_id,
            conn_id,
            tasks: vec![task.abort_handle()],
        };

        drop(registration);
        assert!(!registry.is_online(user_id));
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn superseded_registration_leaves_replacement_alone() {
        let registry = PresenceRegistry::new(PresenceMirror::disabled());
        let user_id = Uuid::new_v4();
        let (old, _old_rx) = ConnectionHandle::channel();
        let (new, _new_rx) = ConnectionHandle::channel();
        let old_id = old.conn_id();
        let new_id = new.conn_id();

        registry.register(user_id, "alice".into(), old);
        let stale = Registration {
            registry: registry.clone(),
            user_id,
            conn_id: old_id,
            tasks: Vec::new(),
        };
        registry.register(user_id, "alice".into(), new);

        drop(stale);
        assert_eq!(registry.lookup(user_id).unwrap().conn_id(), new_id);
    }
}
