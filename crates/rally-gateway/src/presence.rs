//! Ephemeral signals: typing indicators and per-event presence lists.
//! Nothing here touches the store.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;
use uuid::Uuid;

use rally_types::events::ServerEvent;
use rally_types::models::{ChannelTarget, OnlineUser};

use crate::error::GatewayError;
use crate::membership::{ChannelMembership, Subscriber};
use crate::registry::{ConnectionHandle, SessionRegistry, deliver};

pub struct PresenceBroadcaster {
    registry: Arc<SessionRegistry>,
    membership: Arc<ChannelMembership>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>, membership: Arc<ChannelMembership>) -> Self {
        Self { registry, membership }
    }

    /// Send `user_typing` (or `user_stopped_typing`) to everyone else on the
    /// target. Returns how many connections accepted it.
    pub async fn typing(
        &self,
        conn: &ConnectionHandle,
        target: ChannelTarget,
        active: bool,
    ) -> Result<usize, GatewayError> {
        let recipients: Vec<ConnectionHandle> = match target {
            ChannelTarget::Event(event_id) => {
                if !self.membership.is_subscribed(conn.id(), event_id).await {
                    return Err(GatewayError::Authorization("Not joined to this event".into()));
                }
                self.membership
                    .subscribers_of(event_id)
                    .await
                    .into_iter()
                    .filter(|other| other.user_id() != conn.user_id())
                    .collect()
            }
            ChannelTarget::Direct(receiver_id) => {
                if receiver_id == conn.user_id() {
                    return Err(GatewayError::validation("Cannot signal typing to yourself"));
                }
                self.registry.connections_of(receiver_id).await
            }
        };

        let (user_id, display_name) = (conn.user_id(), conn.display_name().to_string());
        let (event_id, receiver_id) = (target.event_id(), target.receiver_id());
        let signal = if active {
            ServerEvent::UserTyping {
                user_id,
                display_name,
                event_id,
                receiver_id,
            }
        } else {
            ServerEvent::UserStoppedTyping {
                user_id,
                display_name,
                event_id,
                receiver_id,
            }
        };

        let delivered = deliver(&recipients, &signal);
        trace!("Typing({}) from {} reached {} connections", active, user_id, delivered);
        Ok(delivered)
    }

    /// Distinct users subscribed to an event channel. A user with several
    /// connections appears once, under the display name of the connection
    /// that joined most recently.
    pub async fn online_users(&self, event_id: Uuid) -> Vec<OnlineUser> {
        let members = self.membership.members(event_id).await;
        dedupe_members(members)
    }
}

fn dedupe_members(members: Vec<Subscriber>) -> Vec<OnlineUser> {
    let mut latest: HashMap<Uuid, Subscriber> = HashMap::new();
    for member in members {
        let user_id = member.conn.user_id();
        match latest.get(&user_id) {
            Some(existing) if existing.joined_seq > member.joined_seq => {}
            _ => {
                latest.insert(user_id, member);
            }
        }
    }

    let mut users: Vec<OnlineUser> = latest
        .into_values()
        .map(|s| OnlineUser {
            user_id: s.conn.user_id(),
            display_name: s.conn.display_name().to_string(),
        })
        .collect();
    users.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    users
}
