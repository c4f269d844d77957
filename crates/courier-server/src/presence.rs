//! In-memory presence registry.
//!
//! Maps each authenticated user to their single live connection handle.
//! A second login for the same user evicts the first connection's routing
//! entry (last socket wins) without forcibly closing the old socket; the
//! old socket's teardown cannot evict the newer entry because
//! [`PresenceRegistry::unregister`] compares handle identity first.
//!
//! The registry is process-wide state with a defined lifecycle: constructed
//! once at startup and passed by reference (cheap clone) to the connection
//! and routing components.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use courier_shared::{ServerEvent, UserId};

/// Sending half of one live WebSocket connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving end the socket task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue an event for this connection.  Returns `false` if the socket
    /// task is gone; callers treat that the same as an offline user.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Tracks all currently connected users.
#[derive(Clone)]
pub struct PresenceRegistry {
    connections: Arc<Mutex<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a user's live connection, replacing any prior handle, then
    /// broadcast the updated online snapshot to every connection.
    pub async fn register(&self, user: UserId, handle: ConnectionHandle) {
        let (snapshot, handles) = {
            let mut connections = self.connections.lock().await;
            if connections.insert(user, handle).is_some() {
                debug!(user = %user, "replaced existing connection (last socket wins)");
            } else {
                debug!(user = %user, "user connected");
            }
            snapshot_and_handles(&connections)
        };
        push_online_snapshot(snapshot, handles);
    }

    /// Remove a user's entry, but only if it still belongs to the
    /// connection being torn down.  A stale disconnect for an already
    /// replaced socket is a no-op.  Returns whether an entry was removed.
    pub async fn unregister(&self, user: UserId, connection_id: Uuid) -> bool {
        let (removed, snapshot, handles) = {
            let mut connections = self.connections.lock().await;
            let matches = connections
                .get(&user)
                .is_some_and(|h| h.id() == connection_id);
            if matches {
                connections.remove(&user);
                debug!(user = %user, "user disconnected");
            } else {
                debug!(user = %user, "stale disconnect ignored");
            }
            let (snapshot, handles) = snapshot_and_handles(&connections);
            (matches, snapshot, handles)
        };

        if removed {
            push_online_snapshot(snapshot, handles);
        }
        removed
    }

    /// Look up the live handle for a user, if any.
    pub async fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.connections.lock().await.get(&user).cloned()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_and_handles(
    connections: &HashMap<UserId, ConnectionHandle>,
) -> (Vec<UserId>, Vec<ConnectionHandle>) {
    (
        connections.keys().copied().collect(),
        connections.values().cloned().collect(),
    )
}

/// O(n) fan-out of the full online list, acceptable at expected scale.
fn push_online_snapshot(snapshot: Vec<UserId>, handles: Vec<ConnectionHandle>) {
    for handle in handles {
        handle.push(ServerEvent::OnlineUsers(snapshot.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn register_lookup_unregister() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (handle, _rx) = ConnectionHandle::new();

        assert!(registry.lookup(user).await.is_none());

        registry.register(user, handle.clone()).await;
        assert_eq!(registry.lookup(user).await.unwrap().id(), handle.id());

        assert!(registry.unregister(user, handle.id()).await);
        assert!(registry.lookup(user).await.is_none());
    }

    #[tokio::test]
    async fn last_socket_wins() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (first, _rx1) = ConnectionHandle::new();
        let (second, _rx2) = ConnectionHandle::new();

        registry.register(user, first.clone()).await;
        registry.register(user, second.clone()).await;

        assert_eq!(registry.lookup(user).await.unwrap().id(), second.id());

        // the first socket's teardown must not evict the second entry
        assert!(!registry.unregister(user, first.id()).await);
        assert_eq!(registry.lookup(user).await.unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn connect_broadcasts_online_snapshot_to_everyone() {
        let registry = PresenceRegistry::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let (alice_handle, mut alice_rx) = ConnectionHandle::new();
        let (bob_handle, mut bob_rx) = ConnectionHandle::new();

        registry.register(alice, alice_handle).await;
        registry.register(bob, bob_handle).await;

        let last = drain(&mut alice_rx).await.pop().unwrap();
        match last {
            ServerEvent::OnlineUsers(mut users) => {
                users.sort();
                let mut expected = vec![alice, bob];
                expected.sort();
                assert_eq!(users, expected);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // bob got the same snapshot on his own connect
        assert!(!drain(&mut bob_rx).await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_broadcasts_shrunk_snapshot() {
        let registry = PresenceRegistry::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let (alice_handle, mut alice_rx) = ConnectionHandle::new();
        let (bob_handle, _bob_rx) = ConnectionHandle::new();

        registry.register(alice, alice_handle).await;
        registry.register(bob, bob_handle.clone()).await;
        drain(&mut alice_rx).await;

        registry.unregister(bob, bob_handle.id()).await;

        match drain(&mut alice_rx).await.pop().unwrap() {
            ServerEvent::OnlineUsers(users) => assert_eq!(users, vec![alice]),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
