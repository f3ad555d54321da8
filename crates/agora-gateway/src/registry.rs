use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use agora_types::events::OutboundFrame;

use crate::mirror::{MirrorOp, PresenceMirror, PresenceSnapshot};

/// Sending half of one live connection's outbound queue.
///
/// The socket itself stays with the connection task; cloning a handle only
/// clones the queue sender, and sending never waits on socket I/O.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the connection's writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue a frame. Returns false if the connection has already gone away.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// One registered connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub user_id: Uuid,
    pub username: String,
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
}

/// Which users are reachable right now, at most one connection each.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// user_id -> the connection that currently owns that user
    connections: RwLock<HashMap<Uuid, Connection>>,

    mirror: PresenceMirror,
}

impl PresenceRegistry {
    pub fn new(mirror: PresenceMirror) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: RwLock::new(HashMap::new()),
                mirror,
            }),
        }
    }

    /// Make `handle` the live connection for `user_id`.
    ///
    /// Returns the entry it superseded, if any. The superseded connection is
    /// left open; closing it is up to its own connection task.
    pub fn register(
        &self,
        user_id: Uuid,
        username: String,
        handle: ConnectionHandle,
    ) -> Option<Connection> {
        let connection = Connection {
            user_id,
            username,
            handle,
            connected_at: Utc::now(),
        };
        let snapshot = PresenceSnapshot {
            user_id,
            username: connection.username.clone(),
            connected_at: connection.connected_at,
        };

        // Publish under the lock so mirror updates keep the map's order.
        let mut connections = self.write();
        let previous = connections.insert(user_id, connection);
        self.inner.mirror.publish(MirrorOp::Set { user_id, snapshot });
        previous
    }

    /// Current handle for `user_id`. Never waits on transport I/O.
    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.read().get(&user_id).map(|c| c.handle.clone())
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.read().contains_key(&user_id)
    }

    pub fn online_count(&self) -> usize {
        self.read().len()
    }

    /// Remove whatever connection `user_id` has. Removing an absent user is a
    /// no-op. Returns whether an entry was removed.
    pub fn unregister(&self, user_id: Uuid) -> bool {
        let mut connections = self.write();
        let removed = connections.remove(&user_id).is_some();
        if removed {
            self.inner.mirror.publish(MirrorOp::Del { user_id });
        }
        removed
    }

    /// Remove `user_id` only while `conn_id` still owns it, so a superseded
    /// connection closing late leaves its replacement registered.
    pub fn unregister_connection(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut connections = self.write();
        let owns = connections
            .get(&user_id)
            .is_some_and(|c| c.handle.conn_id() == conn_id);
        if !owns {
            debug!(%user_id, %conn_id, "Connection no longer owns registry entry");
            return false;
        }

        connections.remove(&user_id);
        self.inner.mirror.publish(MirrorOp::Del { user_id });
        true
    }

    // Entries are replaced whole, so a poisoned lock still guards a
    // consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Connection>> {
        self.inner
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Connection>> {
        self.inner
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::events::{CallRelay, FrameKind};

    fn relay(recipient_id: Uuid) -> OutboundFrame {
        OutboundFrame::Call(CallRelay {
            kind: FrameKind::VideoInvite,
            room_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            recipient_id,
            date: Utc::now(),
        })
    }

    #[test]
    fn lookup_returns_registered_handle() {
        let registry = PresenceRegistry::new(PresenceMirror::disabled());
        let user = Uuid::new_v4();
        let (handle, mut rx) = ConnectionHandle::channel();

        assert!(registry.lookup(user).is_none());
        assert!(registry.register(user, "alice".into(), handle).is_none());

        let found = registry.lookup(user).unwrap();
        assert!(found.send(relay(user)));
        assert!(rx.try_recv().is_ok());
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn register_supersedes_previous_connection() {
        let registry = PresenceRegistry::new(PresenceMirror::disabled());
        let user = Uuid::new_v4();
        let (first, mut first_rx) = ConnectionHandle::channel();
        let (second, mut second_rx) = ConnectionHandle::channel();
        let first_id = first.conn_id();

        registry.register(user, "alice".into(), first);
        let previous = registry.register(user, "alice".into(), second.clone()).unwrap();
        assert_eq!(previous.handle.conn_id(), first_id);

        assert_eq!(registry.lookup(user).unwrap().conn_id(), second.conn_id());
        registry.lookup(user).unwrap().send(relay(user));
        assert!(second_rx.try_recv().is_ok());
        assert!(first_rx.try_recv().is_err());
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = PresenceRegistry::new(PresenceMirror::disabled());
        let user = Uuid::new_v4();
        let (handle, _rx) = ConnectionHandle::channel();
        registry.register(user, "alice".into(), handle);

        assert!(registry.unregister(user));
        assert!(!registry.unregister(user));
        assert!(!registry.unregister(Uuid::new_v4()));
        assert!(!registry.is_online(user));
        assert_eq!(registry.online_count(), 0);
    }

    #[test]
    fn stale_connection_cannot_evict_replacement() {
        let registry = PresenceRegistry::new(PresenceMirror::disabled());
        let user = Uuid::new_v4();
        let (old, _old_rx) = ConnectionHandle::channel();
        let (new, _new_rx) = ConnectionHandle::channel();
        let old_id = old.conn_id();
        let new_id = new.conn_id();

        registry.register(user, "alice".into(), old);
        registry.register(user, "alice".into(), new);

        assert!(!registry.unregister_connection(user, old_id));
        assert!(registry.is_online(user));
        assert!(registry.unregister_connection(user, new_id));
        assert!(!registry.is_online(user));
    }

    #[test]
    fn mirror_follows_registry_changes() {
        let (mirror, mut rx) = PresenceMirror::channel();
        let registry = PresenceRegistry::new(mirror);
        let user = Uuid::new_v4();
        let (handle, _conn_rx) = ConnectionHandle::channel();
        let conn_id = handle.conn_id();

        registry.register(user, "alice".into(), handle);
        match rx.try_recv().unwrap() {
            MirrorOp::Set { user_id, snapshot } => {
                assert_eq!(user_id, user);
                assert_eq!(snapshot.username, "alice");
            }
            other => panic!("expected Set, got {:?}", other),
        }

        registry.unregister_connection(user, conn_id);
        assert_eq!(rx.try_recv().unwrap(), MirrorOp::Del { user_id: user });

        // Nothing left to remove, nothing mirrored.
        registry.unregister(user);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_register_and_unregister_leave_consistent_state() {
        let registry = PresenceRegistry::new(PresenceMirror::disabled());
        let users: Vec<Uuid> = (0..32).map(|_| Uuid::new_v4()).collect();

        std::thread::scope(|scope| {
            for &user in &users {
                let registry = registry.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        let (handle, _rx) = ConnectionHandle::channel();
                        let conn_id = handle.conn_id();
                        registry.register(user, "u".into(), handle);
                        assert!(registry.lookup(user).is_some());
                        registry.unregister_connection(user, conn_id);
                    }
                });
            }
        });

        assert_eq!(registry.online_count(), 0);
    }
}
