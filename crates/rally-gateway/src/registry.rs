//! Session registry: user id -> open connections.
//!
//! The registry entry for a user doubles as that user's direct channel: a
//! direct message is delivered to every handle listed here.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use rally_types::events::ServerEvent;

pub type ConnId = Uuid;

/// Cheap, cloneable handle to one live connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnId,
    user_id: Uuid,
    display_name: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
    closed: AtomicBool,
}

impl ConnectionHandle {
    pub fn new(
        user_id: Uuid,
        display_name: String,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
                user_id,
                display_name,
                tx,
                closed: AtomicBool::new(false),
            }),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnId {
        self.inner.id
    }

    pub fn user_id(&self) -> Uuid {
        self.inner.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    /// Queue an event for this connection. Returns false if the connection is
    /// closed or its writer is gone; callers treat that as a missed push.
    pub fn send(&self, event: ServerEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Returns true only for the call that actually closed the connection.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Deliver `event` to each handle; returns how many accepted it.
pub fn deliver(targets: &[ConnectionHandle], event: &ServerEvent) -> usize {
    targets.iter().filter(|conn| conn.send(event.clone())).count()
}

#[derive(Default)]
pub struct SessionRegistry {
    /// user_id -> (conn_id -> handle). An entry exists iff the map is non-empty.
    sessions: RwLock<HashMap<Uuid, HashMap<ConnId, ConnectionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this is the user's first open connection.
    pub async fn register(&self, conn: &ConnectionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(conn.user_id()).or_default();
        let first = entry.is_empty();
        entry.insert(conn.id(), conn.clone());
        first
    }

    /// Returns true if the user has no connections left.
    pub async fn unregister(&self, conn: &ConnectionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&conn.user_id()) else {
            return false;
        };
        entry.remove(&conn.id());
        if entry.is_empty() {
            sessions.remove(&conn.user_id());
            true
        } else {
            false
        }
    }

    pub async fn connections_of(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&user_id)
    }

    pub async fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.sessions
            .read()
            .await
            .values()
            .flat_map(|conns| conns.values().cloned())
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.values().map(HashMap::len).sum()
    }

    pub async fn online_user_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
