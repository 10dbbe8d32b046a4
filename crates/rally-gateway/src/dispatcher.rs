use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use rally_types::events::{ClientCommand, ServerEvent};
use rally_types::models::ChannelTarget;

use crate::auth::{Authenticator, Identity};
use crate::config::GatewayConfig;
use crate::error::{AuthError, GatewayError};
use crate::history::HistoryService;
use crate::membership::{ChannelMembership, JoinOutcome};
use crate::pipeline::{MessagePipeline, OutgoingMessage};
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, SessionRegistry, deliver};
use crate::store::{AccessOracle, Directory, MessageStore};
use crate::validate::resolve_target;

/// Collaborators the gateway is built on.
#[derive(Clone)]
pub struct Backends {
    pub directory: Arc<dyn Directory>,
    pub oracle: Arc<dyn AccessOracle>,
    pub store: Arc<dyn MessageStore>,
}

/// Owns every piece of shared gateway state and routes client commands to the
/// component that handles them. Cloning is cheap.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    authenticator: Authenticator,
    registry: Arc<SessionRegistry>,
    membership: Arc<ChannelMembership>,
    pipeline: MessagePipeline,
    presence: PresenceBroadcaster,
    history: HistoryService,
    oracle: Arc<dyn AccessOracle>,
}

impl Dispatcher {
    pub fn new(config: GatewayConfig, jwt_secret: &str, backends: Backends) -> Self {
        let Backends {
            directory,
            oracle,
            store,
        } = backends;

        let registry = Arc::new(SessionRegistry::new());
        let membership = Arc::new(ChannelMembership::new(oracle.clone()));

        Self {
            inner: Arc::new(DispatcherInner {
                authenticator: Authenticator::new(jwt_secret, directory.clone()),
                pipeline: MessagePipeline::new(
                    config.clone(),
                    registry.clone(),
                    membership.clone(),
                    store.clone(),
                    oracle.clone(),
                    directory.clone(),
                ),
                presence: PresenceBroadcaster::new(registry.clone(), membership.clone()),
                history: HistoryService::new(config, store, oracle.clone(), directory),
                registry,
                membership,
                oracle,
            }),
        }
    }

    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.inner.authenticator.authenticate(token).await
    }

    /// Register an authenticated connection. The returned receiver is the
    /// connection's outbound queue; `ready` is already in it.
    pub async fn connect(&self, identity: Identity) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (conn, rx) = ConnectionHandle::new(identity.user_id, identity.display_name);
        let first = self.inner.registry.register(&conn).await;

        conn.send(ServerEvent::Ready {
            user_id: conn.user_id(),
            display_name: conn.display_name().to_string(),
        });

        info!(
            "{} ({}) connected as {}{}",
            conn.display_name(),
            conn.user_id(),
            conn.id(),
            if first { "" } else { " (additional connection)" }
        );
        (conn, rx)
    }

    /// Run one client command. Failures become an `error` event on this
    /// connection only.
    pub async fn handle_command(&self, conn: &ConnectionHandle, cmd: ClientCommand) {
        let name = cmd.name();
        if let Err(e) = self.execute(conn, cmd).await {
            warn!(
                "{} ({}) {} failed [{}]: {}",
                conn.display_name(),
                conn.user_id(),
                name,
                e.kind(),
                e
            );
            conn.send(ServerEvent::error(e.client_message()));
        }
    }

    async fn execute(&self, conn: &ConnectionHandle, cmd: ClientCommand) -> Result<(), GatewayError> {
        match cmd {
            ClientCommand::JoinEvent { event_id } => {
                match self.inner.membership.join(conn, ChannelTarget::Event(event_id)).await? {
                    JoinOutcome::Joined | JoinOutcome::AlreadyJoined => {
                        conn.send(ServerEvent::JoinedEvent {
                            event_id,
                            success: true,
                        });
                    }
                    JoinOutcome::Stale => {}
                }
            }

            ClientCommand::LeaveEvent { event_id } => {
                self.inner.membership.leave(conn, event_id).await;
            }

            ClientCommand::SendMessage {
                content,
                kind,
                event_id,
                receiver_id,
            } => {
                self.inner
                    .pipeline
                    .send(
                        conn,
                        OutgoingMessage {
                            content,
                            kind,
                            event_id,
                            receiver_id,
                        },
                    )
                    .await?;
            }

            ClientCommand::TypingStart { event_id, receiver_id } => {
                let target = resolve_target(None, event_id, receiver_id)?;
                self.inner.presence.typing(conn, target, true).await?;
            }

            ClientCommand::TypingStop { event_id, receiver_id } => {
                let target = resolve_target(None, event_id, receiver_id)?;
                self.inner.presence.typing(conn, target, false).await?;
            }

            ClientCommand::GetChatHistory {
                kind,
                event_id,
                receiver_id,
                limit,
                offset,
            } => {
                let target = resolve_target(kind, event_id, receiver_id)?;
                let page = self
                    .inner
                    .history
                    .history(conn.user_id(), target, limit, offset)
                    .await?;
                conn.send(page.into());
            }

            ClientCommand::GetOnlineUsers { event_id } => {
                let joined = self.inner.membership.is_subscribed(conn.id(), event_id).await;
                if !joined && !self.inner.oracle.is_authorized(conn.user_id(), event_id).await? {
                    return Err(GatewayError::access_denied());
                }
                let users = self.inner.presence.online_users(event_id).await;
                conn.send(ServerEvent::OnlineUsers { event_id, users });
            }

            ClientCommand::MarkRead { sender_id } => {
                let count = self.inner.pipeline.mark_read(conn, sender_id).await?;
                conn.send(ServerEvent::MessagesRead {
                    user_id: sender_id,
                    count,
                });
            }
        }

        Ok(())
    }

    /// Tear down a connection. Safe to call more than once; only the first
    /// call has any effect.
    pub async fn disconnect(&self, conn: &ConnectionHandle) {
        // Closing first makes any join still waiting on the oracle discard itself.
        if !conn.mark_closed() {
            return;
        }

        let channels = self.inner.membership.leave_all(conn).await;
        let last = self.inner.registry.unregister(conn).await;

        if last {
            let others = self.inner.registry.all_connections().await;
            deliver(
                &others,
                &ServerEvent::UserDisconnected {
                    user_id: conn.user_id(),
                    display_name: conn.display_name().to_string(),
                },
            );
        }

        info!(
            "{} ({}) disconnected {} (left {} channels{})",
            conn.display_name(),
            conn.user_id(),
            conn.id(),
            channels.len(),
            if last { ", now offline" } else { "" }
        );
    }

    /// Best-effort delivery to every open connection of a user. Returns how
    /// many accepted it; zero when the user is offline.
    pub async fn push_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        let conns = self.inner.registry.connections_of(user_id).await;
        deliver(&conns, &event)
    }

    /// Fan an event out to an event channel without persisting it.
    pub async fn broadcast_to_event_channel(&self, event_id: Uuid, event: ServerEvent) -> usize {
        let conns = self.inner.membership.subscribers_of(event_id).await;
        deliver(&conns, &event)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.connection_count().await
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.registry.is_online(user_id).await
    }
}
