//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use rally_types::events::ServerEvent;
use rally_types::models::{ChannelTarget, ChatMessage, EventRole};

use crate::error::StoreError;
use crate::store::{AccessOracle, Directory, HistoryQuery, MessageStore};

#[derive(Default)]
pub struct MemoryBackend {
    users: Mutex<HashMap<Uuid, String>>,
    grants: Mutex<HashSet<(Uuid, Uuid)>>,
    messages: Mutex<Vec<ChatMessage>>,
    fail_persist: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().insert(id, name.to_string());
        id
    }

    pub fn remove_user(&self, id: Uuid) {
        self.users.lock().unwrap().remove(&id);
    }

    pub fn allow(&self, user_id: Uuid, event_id: Uuid) {
        self.grants.lock().unwrap().insert((user_id, event_id));
    }

    pub fn revoke(&self, user_id: Uuid, event_id: Uuid) {
        self.grants.lock().unwrap().remove(&(user_id, event_id));
    }

    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }

    fn check_lookups(&self) -> Result<(), StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("lookups disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryBackend {
    async fn display_name(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        self.check_lookups()?;
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }
}

#[async_trait]
impl AccessOracle for MemoryBackend {
    async fn event_roles(&self, user_id: Uuid, event_id: Uuid) -> Result<Vec<EventRole>, StoreError> {
        self.check_lookups()?;
        if self.grants.lock().unwrap().contains(&(user_id, event_id)) {
            Ok(vec![EventRole::Attendee])
        } else {
            Ok(Vec::new())
        }
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn persist(&self, message: ChatMessage) -> Result<ChatMessage, StoreError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("persist disabled".into()));
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<ChatMessage>, StoreError> {
        self.check_lookups()?;
        let messages = self.messages.lock().unwrap();
        let mut matching: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| match query.target {
                ChannelTarget::Event(event_id) => m.event_id == Some(event_id),
                ChannelTarget::Direct(peer) => {
                    (m.sender_id == query.viewer && m.receiver_id == Some(peer))
                        || (m.sender_id == peer && m.receiver_id == Some(query.viewer))
                }
            })
            .cloned()
            .collect();
        // Stable: equal timestamps keep newest-inserted first.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn mark_read(&self, reader_id: Uuid, sender_id: Uuid) -> Result<usize, StoreError> {
        let mut messages = self.messages.lock().unwrap();
        let mut changed = 0;
        for m in messages.iter_mut() {
            if m.receiver_id == Some(reader_id) && m.sender_id == sender_id && !m.is_read {
                m.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// Oracle that parks every call until `release` is called.
pub struct GatedOracle {
    allow: bool,
    called: Notify,
    gate: Notify,
}

impl GatedOracle {
    pub fn new(allow: bool) -> Arc<Self> {
        Arc::new(Self {
            allow,
            called: Notify::new(),
            gate: Notify::new(),
        })
    }

    pub async fn wait_for_call(&self) {
        self.called.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl AccessOracle for GatedOracle {
    async fn event_roles(&self, _user_id: Uuid, _event_id: Uuid) -> Result<Vec<EventRole>, StoreError> {
        self.called.notify_one();
        self.gate.notified().await;
        Ok(if self.allow { vec![EventRole::Attendee] } else { Vec::new() })
    }
}

/// Store that commits each message, then parks until `release` is called.
pub struct ParkedStore {
    inner: Arc<MemoryBackend>,
    committed: Notify,
    gate: Notify,
}

impl ParkedStore {
    pub fn new(inner: Arc<MemoryBackend>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            committed: Notify::new(),
            gate: Notify::new(),
        })
    }

    pub async fn wait_for_commit(&self) {
        self.committed.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl MessageStore for ParkedStore {
    async fn persist(&self, message: ChatMessage) -> Result<ChatMessage, StoreError> {
        let stored = self.inner.persist(message).await?;
        self.committed.notify_one();
        self.gate.notified().await;
        Ok(stored)
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<ChatMessage>, StoreError> {
        self.inner.query(query).await
    }

    async fn mark_read(&self, reader_id: Uuid, sender_id: Uuid) -> Result<usize, StoreError> {
        self.inner.mark_read(reader_id, sender_id).await
    }
}

/// Everything queued for a connection so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
