//! Collaborator seams: identity directory, event access oracle, message store.
//!
//! The gateway only talks to these traits. `SqliteStore` implements all three
//! over `rally_db::Database`, running every query on the blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use uuid::Uuid;

use rally_db::Database;
use rally_db::models::MessageRow;
use rally_types::models::{Capability, ChannelTarget, ChatMessage, EventRole};

use crate::error::StoreError;

/// Resolves user ids to display names. `None` means the user does not exist.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn display_name(&self, user_id: Uuid) -> Result<Option<String>, StoreError>;
}

/// Answers "may this user take part in this event's chat?"
#[async_trait]
pub trait AccessOracle: Send + Sync {
    async fn event_roles(&self, user_id: Uuid, event_id: Uuid) -> Result<Vec<EventRole>, StoreError>;

    async fn is_authorized(&self, user_id: Uuid, event_id: Uuid) -> Result<bool, StoreError> {
        let roles = self.event_roles(user_id, event_id).await?;
        Ok(roles.iter().any(|role| role.grants(Capability::JoinChat)))
    }
}

/// One page request against the store.
#[derive(Debug, Clone, Copy)]
pub struct HistoryQuery {
    /// Who is reading; the other side of a direct target.
    pub viewer: Uuid,
    pub target: ChannelTarget,
    pub limit: u32,
    pub offset: u32,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Single insert. Returns the record as stored.
    async fn persist(&self, message: ChatMessage) -> Result<ChatMessage, StoreError>;

    /// Newest first.
    async fn query(&self, query: HistoryQuery) -> Result<Vec<ChatMessage>, StoreError>;

    /// Marks unread direct messages `sender_id` -> `reader_id` as read.
    async fn mark_read(&self, reader_id: Uuid, sender_id: Uuid) -> Result<usize, StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Unavailable(format!("spawn_blocking join error: {}", e)))?
            .map_err(|e| StoreError::Database(format!("{:#}", e)))
    }
}

#[async_trait]
impl Directory for SqliteStore {
    async fn display_name(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        self.blocking(move |db| db.get_display_name(&user_id.to_string())).await
    }
}

#[async_trait]
impl AccessOracle for SqliteStore {
    async fn event_roles(&self, user_id: Uuid, event_id: Uuid) -> Result<Vec<EventRole>, StoreError> {
        self.blocking(move |db| db.event_roles(&user_id.to_string(), &event_id.to_string()))
            .await
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn persist(&self, message: ChatMessage) -> Result<ChatMessage, StoreError> {
        // Timestamps are stored at microsecond precision; hand back exactly that.
        let message = ChatMessage {
            created_at: message.created_at.trunc_subsecs(6),
            ..message
        };
        let row = to_row(&message);
        self.blocking(move |db| db.insert_message(&row)).await?;
        Ok(message)
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<ChatMessage>, StoreError> {
        let HistoryQuery {
            viewer,
            target,
            limit,
            offset,
        } = query;

        let rows = self
            .blocking(move |db| match target {
                ChannelTarget::Event(event_id) => {
                    db.recent_event_messages(&event_id.to_string(), limit, offset)
                }
                ChannelTarget::Direct(peer) => {
                    db.recent_direct_messages(&viewer.to_string(), &peer.to_string(), limit, offset)
                }
            })
            .await?;

        // A single corrupt row fails the whole page rather than returning a partial one.
        rows.into_iter().map(from_row).collect()
    }

    async fn mark_read(&self, reader_id: Uuid, sender_id: Uuid) -> Result<usize, StoreError> {
        self.blocking(move |db| db.mark_direct_read(&reader_id.to_string(), &sender_id.to_string()))
            .await
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_row(message: &ChatMessage) -> MessageRow {
    MessageRow {
        id: message.id.to_string(),
        content: message.content.clone(),
        sender_id: message.sender_id.to_string(),
        sender_name: message.sender_name.clone(),
        event_id: message.event_id.map(|id| id.to_string()),
        receiver_id: message.receiver_id.map(|id| id.to_string()),
        created_at: format_timestamp(message.created_at),
        is_read: message.is_read,
    }
}

fn parse_uuid(field: &str, value: &str, row_id: &str) -> Result<Uuid, StoreError> {
    value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{} '{}' on message '{}': {}", field, value, row_id, e)))
}

fn from_row(row: MessageRow) -> Result<ChatMessage, StoreError> {
    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::Corrupt(format!("created_at '{}' on message '{}': {}", row.created_at, row.id, e))
        })?;

    Ok(ChatMessage {
        id: parse_uuid("id", &row.id, &row.id)?,
        sender_id: parse_uuid("sender_id", &row.sender_id, &row.id)?,
        event_id: row
            .event_id
            .as_deref()
            .map(|v| parse_uuid("event_id", v, &row.id))
            .transpose()?,
        receiver_id: row
            .receiver_id
            .as_deref()
            .map(|v| parse_uuid("receiver_id", v, &row.id))
            .transpose()?,
        content: row.content,
        sender_name: row.sender_name,
        created_at,
        is_read: row.is_read,
    })
}
