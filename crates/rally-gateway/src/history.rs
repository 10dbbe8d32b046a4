use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use rally_types::events::ServerEvent;
use rally_types::models::{ChannelTarget, ChatMessage};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::store::{AccessOracle, Directory, HistoryQuery, MessageStore};

#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub target: ChannelTarget,
    /// Oldest first.
    pub messages: Vec<ChatMessage>,
    pub limit: u32,
    pub offset: u32,
}

impl From<HistoryPage> for ServerEvent {
    fn from(page: HistoryPage) -> Self {
        ServerEvent::ChatHistory {
            kind: page.target.kind(),
            event_id: page.target.event_id(),
            receiver_id: page.target.receiver_id(),
            messages: page.messages,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

pub struct HistoryService {
    config: GatewayConfig,
    store: Arc<dyn MessageStore>,
    oracle: Arc<dyn AccessOracle>,
    directory: Arc<dyn Directory>,
}

impl HistoryService {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn MessageStore>,
        oracle: Arc<dyn AccessOracle>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            config,
            store,
            oracle,
            directory,
        }
    }

    /// One page of history, in ascending chronological order. Authorization is
    /// checked afresh on every call, regardless of what the requester joined.
    pub async fn history(
        &self,
        requester: Uuid,
        target: ChannelTarget,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<HistoryPage, GatewayError> {
        match target {
            ChannelTarget::Event(event_id) => {
                if !self.oracle.is_authorized(requester, event_id).await? {
                    return Err(GatewayError::access_denied());
                }
            }
            ChannelTarget::Direct(peer) => {
                if peer == requester {
                    return Err(GatewayError::validation("Cannot load a conversation with yourself"));
                }
                if self.directory.display_name(peer).await?.is_none() {
                    return Err(GatewayError::validation("Recipient not found"));
                }
            }
        }

        let limit = limit
            .unwrap_or(self.config.history_default_limit)
            .min(self.config.history_max_limit)
            .max(1);
        let offset = offset.unwrap_or(0);

        let mut messages = self
            .store
            .query(HistoryQuery {
                viewer: requester,
                target,
                limit,
                offset,
            })
            .await
            .map_err(|e| {
                error!("History query for {} failed: {}", requester, e);
                GatewayError::Persistence("Failed to load chat history".into())
            })?;

        // Store returns newest first.
        messages.reverse();
        debug!("History for {} on {:?}: {} messages", requester, target, messages.len());

        Ok(HistoryPage {
            target,
            messages,
            limit,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use chrono::{Duration, TimeZone, Utc};

    fn service(backend: &Arc<MemoryBackend>) -> HistoryService {
        HistoryService::new(
            GatewayConfig::default(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
        )
    }

    async fn seed_event(backend: &MemoryBackend, sender: Uuid, event: Uuid, count: usize) -> Vec<ChatMessage> {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0).unwrap();
        let mut out = Vec::new();
        for i in 0..count {
            let msg = ChatMessage::new(
                sender,
                "Olga",
                ChannelTarget::Event(event),
                format!("m{}", i + 1),
                t0 + Duration::seconds(i as i64),
            );
            out.push(backend.persist(msg).await.unwrap());
        }
        out
    }

    fn contents(page: &HistoryPage) -> Vec<&str> {
        page.messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn latest_page_is_returned_oldest_first() {
        let backend = MemoryBackend::new();
        let (olga, event) = (backend.user("Olga"), Uuid::new_v4());
        backend.allow(olga, event);
        seed_event(&backend, olga, event, 5).await;
        let history = service(&backend);

        let page = history.history(olga, ChannelTarget::Event(event), Some(2), Some(0)).await.unwrap();
        assert_eq!(contents(&page), vec!["m4", "m5"]);

        let again = history.history(olga, ChannelTarget::Event(event), Some(2), Some(0)).await.unwrap();
        assert_eq!(page.messages, again.messages);

        let older = history.history(olga, ChannelTarget::Event(event), Some(2), Some(2)).await.unwrap();
        assert_eq!(contents(&older), vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn limit_defaults_and_is_clamped() {
        let backend = MemoryBackend::new();
        let (olga, event) = (backend.user("Olga"), Uuid::new_v4());
        backend.allow(olga, event);
        seed_event(&backend, olga, event, 3).await;
        let history = service(&backend);

        let page = history.history(olga, ChannelTarget::Event(event), None, None).await.unwrap();
        assert_eq!(page.limit, 50);
        assert_eq!(page.offset, 0);
        assert_eq!(page.messages.len(), 3);

        let page = history.history(olga, ChannelTarget::Event(event), Some(10_000), None).await.unwrap();
        assert_eq!(page.limit, 100);

        let page = history.history(olga, ChannelTarget::Event(event), Some(0), None).await.unwrap();
        assert_eq!(page.limit, 1);
        assert_eq!(contents(&page), vec!["m3"]);
    }

    #[tokio::test]
    async fn zero_max_limit_still_returns_one_message() {
        let backend = MemoryBackend::new();
        let (olga, event) = (backend.user("Olga"), Uuid::new_v4());
        backend.allow(olga, event);
        seed_event(&backend, olga, event, 3).await;
        let config = GatewayConfig {
            history_default_limit: 0,
            history_max_limit: 0,
            ..GatewayConfig::default()
        };
        let history = HistoryService::new(config, backend.clone(), backend.clone(), backend.clone());

        let page = history.history(olga, ChannelTarget::Event(event), Some(5), None).await.unwrap();
        assert_eq!(page.limit, 1);
        assert_eq!(contents(&page), vec!["m3"]);
    }

    #[tokio::test]
    async fn authorization_is_rechecked_on_every_call() {
        let backend = MemoryBackend::new();
        let (fay, event) = (backend.user("Fay"), Uuid::new_v4());
        backend.allow(fay, event);
        seed_event(&backend, fay, event, 1).await;
        let history = service(&backend);

        assert!(history.history(fay, ChannelTarget::Event(event), None, None).await.is_ok());

        backend.revoke(fay, event);
        let err = history.history(fay, ChannelTarget::Event(event), None, None).await.unwrap_err();
        assert_eq!(err.client_message(), "Access denied to this event");
    }

    #[tokio::test]
    async fn direct_history_includes_both_directions() {
        let backend = MemoryBackend::new();
        let (olga, fay, sid) = (backend.user("Olga"), backend.user("Fay"), backend.user("Sid"));
        let t0 = Utc::now();
        backend
            .persist(ChatMessage::new(olga, "Olga", ChannelTarget::Direct(fay), "hi", t0))
            .await
            .unwrap();
        backend
            .persist(ChatMessage::new(fay, "Fay", ChannelTarget::Direct(olga), "hello", t0 + Duration::seconds(1)))
            .await
            .unwrap();
        backend
            .persist(ChatMessage::new(sid, "Sid", ChannelTarget::Direct(fay), "psst", t0 + Duration::seconds(2)))
            .await
            .unwrap();
        let history = service(&backend);

        let page = history.history(fay, ChannelTarget::Direct(olga), None, None).await.unwrap();
        assert_eq!(contents(&page), vec!["hi", "hello"]);

        let err = history.history(fay, ChannelTarget::Direct(Uuid::new_v4()), None, None).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn store_failure_returns_no_page() {
        let backend = MemoryBackend::new();
        let (olga, event) = (backend.user("Olga"), Uuid::new_v4());
        backend.allow(olga, event);
        seed_event(&backend, olga, event, 2).await;
        let history = service(&backend);

        backend.fail_lookups(true);
        let err = history.history(olga, ChannelTarget::Event(event), None, None).await.unwrap_err();
        assert_eq!(err.kind(), "persistence");
    }

    #[test]
    fn page_converts_to_wire_event() {
        let event = Uuid::new_v4();
        let page = HistoryPage {
            target: ChannelTarget::Event(event),
            messages: Vec::new(),
            limit: 2,
            offset: 0,
        };
        match ServerEvent::from(page) {
            ServerEvent::ChatHistory { event_id, receiver_id, limit, .. } => {
                assert_eq!(event_id, Some(event));
                assert_eq!(receiver_id, None);
                assert_eq!(limit, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
