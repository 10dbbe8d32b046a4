//! Validate -> persist -> fan out.
//!
//! A message is broadcast only after the store accepted it, so a failed write
//! is never seen live. Fan-out works from a subscriber snapshot taken after
//! the write; anyone who leaves in between catches up through history.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use rally_types::events::ServerEvent;
use rally_types::models::{ChannelKind, ChannelTarget, ChatMessage};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::membership::ChannelMembership;
use crate::registry::{ConnectionHandle, SessionRegistry, deliver};
use crate::store::{AccessOracle, Directory, MessageStore};
use crate::validate::{resolve_target, validate_content};

/// The client's `send_message` payload.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub content: String,
    pub kind: Option<ChannelKind>,
    pub event_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
}

#[derive(Debug)]
pub struct Delivery {
    pub message: ChatMessage,
    /// Connections that accepted the live push.
    pub delivered: usize,
}

pub struct MessagePipeline {
    config: GatewayConfig,
    registry: Arc<SessionRegistry>,
    membership: Arc<ChannelMembership>,
    store: Arc<dyn MessageStore>,
    oracle: Arc<dyn AccessOracle>,
    directory: Arc<dyn Directory>,
}

impl MessagePipeline {
    pub fn new(
        config: GatewayConfig,
        registry: Arc<SessionRegistry>,
        membership: Arc<ChannelMembership>,
        store: Arc<dyn MessageStore>,
        oracle: Arc<dyn AccessOracle>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            config,
            registry,
            membership,
            store,
            oracle,
            directory,
        }
    }

    pub async fn send(&self, conn: &ConnectionHandle, outgoing: OutgoingMessage) -> Result<Delivery, GatewayError> {
        let content = validate_content(&outgoing.content, self.config.max_message_length)?;
        let target = resolve_target(outgoing.kind, outgoing.event_id, outgoing.receiver_id)?;

        match target {
            ChannelTarget::Event(event_id) => {
                // Subscribers were authorized at join time; anyone else is checked now.
                let joined = self.membership.is_subscribed(conn.id(), event_id).await;
                if !joined && !self.oracle.is_authorized(conn.user_id(), event_id).await? {
                    return Err(GatewayError::access_denied());
                }
            }
            ChannelTarget::Direct(receiver_id) => {
                if receiver_id == conn.user_id() {
                    return Err(GatewayError::validation("Cannot send a direct message to yourself"));
                }
                if self.directory.display_name(receiver_id).await?.is_none() {
                    return Err(GatewayError::validation("Recipient not found"));
                }
            }
        }

        let message = ChatMessage::new(conn.user_id(), conn.display_name(), target, content, Utc::now());
        let message = self.store.persist(message).await.map_err(|e| {
            error!("Failed to persist message from {}: {}", conn.user_id(), e);
            GatewayError::Persistence("Failed to send message".into())
        })?;

        if conn.is_closed() {
            debug!("Sender {} closed during persist; fanning out to others", conn.id());
        }

        let recipients = match target {
            ChannelTarget::Event(event_id) => self.membership.subscribers_of(event_id).await,
            ChannelTarget::Direct(receiver_id) => {
                let mut targets = self.registry.connections_of(receiver_id).await;
                targets.extend(self.registry.connections_of(conn.user_id()).await);
                targets
            }
        };

        let delivered = deliver(&recipients, &ServerEvent::NewMessage(message.clone()));
        debug!(
            "Message {} from {} delivered to {}/{} connections",
            message.id,
            conn.user_id(),
            delivered,
            recipients.len()
        );

        Ok(Delivery { message, delivered })
    }

    /// Mark direct messages from `sender_id` as read and tell the sender.
    pub async fn mark_read(&self, conn: &ConnectionHandle, sender_id: Uuid) -> Result<usize, GatewayError> {
        let count = self.store.mark_read(conn.user_id(), sender_id).await?;

        if count > 0 {
            info!("{} read {} messages from {}", conn.user_id(), count, sender_id);
            let senders = self.registry.connections_of(sender_id).await;
            deliver(
                &senders,
                &ServerEvent::MessagesRead {
                    user_id: conn.user_id(),
                    count,
                },
            );
        }

        Ok(count)
    }
}
