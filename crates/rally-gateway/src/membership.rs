//! Event channel subscriber sets.
//!
//! Joins are gated by the access oracle, evaluated once at join time. The
//! oracle call is a suspension point: the connection may have closed by the
//! time it resolves, so the `closed` flag is re-checked under the write lock
//! before inserting. The disconnection handler sets that flag before taking
//! the same lock, so a closed connection is never left subscribed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use rally_types::events::ServerEvent;
use rally_types::models::ChannelTarget;

use crate::error::GatewayError;
use crate::registry::{ConnId, ConnectionHandle, deliver};
use crate::store::AccessOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Newly subscribed.
    Joined,
    /// Already subscribed (or a direct channel, which is always subscribed).
    AlreadyJoined,
    /// The connection closed while authorization was pending; nothing changed.
    Stale,
}

/// One subscription. `joined_seq` orders joins across the whole process.
#[derive(Clone)]
pub struct Subscriber {
    pub conn: ConnectionHandle,
    pub joined_seq: u64,
}

#[derive(Default)]
struct MembershipState {
    channels: HashMap<Uuid, HashMap<ConnId, Subscriber>>,
    by_conn: HashMap<ConnId, HashSet<Uuid>>,
    next_seq: u64,
}

impl MembershipState {
    /// Removes one subscription. `None` if it did not exist; otherwise the
    /// connections that should hear a departure notice (empty when the user
    /// still has another connection in the channel).
    fn remove(&mut self, conn: &ConnectionHandle, event_id: Uuid) -> Option<Vec<ConnectionHandle>> {
        if let Some(joined) = self.by_conn.get_mut(&conn.id()) {
            joined.remove(&event_id);
            if joined.is_empty() {
                self.by_conn.remove(&conn.id());
            }
        }

        let channel = self.channels.get_mut(&event_id)?;
        channel.remove(&conn.id())?;

        let user_still_present = channel.values().any(|s| s.conn.user_id() == conn.user_id());
        let notify = if user_still_present {
            Vec::new()
        } else {
            channel.values().map(|s| s.conn.clone()).collect()
        };

        if channel.is_empty() {
            self.channels.remove(&event_id);
        }
        Some(notify)
    }
}

pub struct ChannelMembership {
    oracle: Arc<dyn AccessOracle>,
    state: RwLock<MembershipState>,
}

impl ChannelMembership {
    pub fn new(oracle: Arc<dyn AccessOracle>) -> Self {
        Self {
            oracle,
            state: RwLock::new(MembershipState::default()),
        }
    }

    pub async fn join(&self, conn: &ConnectionHandle, target: ChannelTarget) -> Result<JoinOutcome, GatewayError> {
        let event_id = match target {
            ChannelTarget::Direct(_) => return Ok(JoinOutcome::AlreadyJoined),
            ChannelTarget::Event(event_id) => event_id,
        };

        if self.is_subscribed(conn.id(), event_id).await {
            return Ok(JoinOutcome::AlreadyJoined);
        }

        if !self.oracle.is_authorized(conn.user_id(), event_id).await? {
            debug!("{} denied access to event {}", conn.user_id(), event_id);
            return Err(GatewayError::access_denied());
        }

        let arrivals = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            if conn.is_closed() {
                debug!("Discarding join of closed connection {} to {}", conn.id(), event_id);
                return Ok(JoinOutcome::Stale);
            }

            let joined_seq = state.next_seq;
            state.next_seq += 1;

            let channel = state.channels.entry(event_id).or_default();
            if channel.contains_key(&conn.id()) {
                return Ok(JoinOutcome::AlreadyJoined);
            }

            let user_already_present = channel.values().any(|s| s.conn.user_id() == conn.user_id());
            let arrivals: Vec<ConnectionHandle> = if user_already_present {
                Vec::new()
            } else {
                channel.values().map(|s| s.conn.clone()).collect()
            };

            channel.insert(
                conn.id(),
                Subscriber {
                    conn: conn.clone(),
                    joined_seq,
                },
            );
            state.by_conn.entry(conn.id()).or_default().insert(event_id);
            arrivals
        };

        info!("{} ({}) joined event {}", conn.display_name(), conn.user_id(), event_id);

        deliver(
            &arrivals,
            &ServerEvent::UserJoinedEvent {
                event_id,
                user_id: conn.user_id(),
                display_name: conn.display_name().to_string(),
            },
        );

        Ok(JoinOutcome::Joined)
    }

    /// Returns whether the connection was subscribed.
    pub async fn leave(&self, conn: &ConnectionHandle, event_id: Uuid) -> bool {
        let notify = self.state.write().await.remove(conn, event_id);

        match notify {
            Some(remaining) => {
                info!("{} ({}) left event {}", conn.display_name(), conn.user_id(), event_id);
                notify_departure(conn, event_id, &remaining);
                true
            }
            None => false,
        }
    }

    /// Drops every subscription of `conn`. Returns the channels it was in.
    pub async fn leave_all(&self, conn: &ConnectionHandle) -> Vec<Uuid> {
        let departures: Vec<(Uuid, Vec<ConnectionHandle>)> = {
            let mut state = self.state.write().await;
            let joined = state.by_conn.remove(&conn.id()).unwrap_or_default();
            joined
                .into_iter()
                .filter_map(|event_id| state.remove(conn, event_id).map(|notify| (event_id, notify)))
                .collect()
        };

        for (event_id, remaining) in &departures {
            notify_departure(conn, *event_id, remaining);
        }

        departures.into_iter().map(|(event_id, _)| event_id).collect()
    }

    pub async fn is_subscribed(&self, conn_id: ConnId, event_id: Uuid) -> bool {
        self.state
            .read()
            .await
            .channels
            .get(&event_id)
            .is_some_and(|channel| channel.contains_key(&conn_id))
    }

    /// Snapshot; safe to iterate while joins and leaves continue.
    pub async fn subscribers_of(&self, event_id: Uuid) -> Vec<ConnectionHandle> {
        self.state
            .read()
            .await
            .channels
            .get(&event_id)
            .map(|channel| channel.values().map(|s| s.conn.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn members(&self, event_id: Uuid) -> Vec<Subscriber> {
        self.state
            .read()
            .await
            .channels
            .get(&event_id)
            .map(|channel| channel.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn channels_of(&self, conn_id: ConnId) -> Vec<Uuid> {
        self.state
            .read()
            .await
            .by_conn
            .get(&conn_id)
            .map(|joined| joined.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn notify_departure(conn: &ConnectionHandle, event_id: Uuid, remaining: &[ConnectionHandle]) {
    deliver(
        remaining,
        &ServerEvent::UserLeftEvent {
            event_id,
            user_id: conn.user_id(),
            display_name: conn.display_name().to_string(),
        },
    );
}
