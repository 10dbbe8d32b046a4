use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use rally_types::events::{ClientCommand, ServerEvent};

use crate::auth::Identity;
use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionHandle;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const MAX_MISSED_PONGS: u8 = 2;

/// Drive one authenticated WebSocket until either side goes away.
///
/// Commands are handled one at a time in arrival order, so a connection's
/// messages are persisted and broadcast in the order it sent them.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, identity: Identity) {
    let (mut sender, receiver) = socket.split();
    let (conn, mut outbound) = dispatcher.connect(identity).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Fired by the send task when the socket can no longer be written.
    let shutdown = Arc::new(Notify::new());
    let send_shutdown = shutdown.clone();

    let send_conn = conn.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let Some(text) = encode_event(&event) else { continue };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!(
                                "Heartbeat timeout for {} (missed {} pongs), dropping connection",
                                send_conn.id(),
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        send_shutdown.notify_one();
    });

    let mut recv_task = tokio::spawn(receive_loop(
        receiver,
        dispatcher.clone(),
        conn.clone(),
        shutdown.clone(),
        pong_flag_recv,
    ));

    tokio::select! {
        _ = &mut send_task => {
            // Let a command already in flight run to completion.
            if let Err(e) = recv_task.await {
                error!("Receive task for {} failed: {}", conn.id(), e);
            }
        }
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(&conn).await;
}

/// Reads frames until the client goes away or `shutdown` fires. Only the wait
/// for the next frame is raced against `shutdown`; a command that has started
/// always finishes.
async fn receive_loop<S, E>(
    mut receiver: S,
    dispatcher: Dispatcher,
    conn: ConnectionHandle,
    shutdown: Arc<Notify>,
    pong_received: Arc<AtomicBool>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            msg = receiver.next() => match msg {
                Some(Ok(msg)) => msg,
                _ => break,
            },
        };

        match msg {
            Message::Text(text) => match parse_command(text.as_str()) {
                Ok(cmd) => dispatcher.handle_command(&conn, cmd).await,
                Err(e) => {
                    warn!(
                        "{} ({}) bad command: {} -- raw: {}",
                        conn.display_name(),
                        conn.user_id(),
                        e,
                        preview(text.as_str())
                    );
                    conn.send(ServerEvent::error("Invalid payload"));
                }
            },
            Message::Binary(data) => {
                debug!("{} sent {} byte binary frame", conn.id(), data.len());
                conn.send(ServerEvent::error("Invalid payload"));
            }
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            Message::Ping(_) => {}
        }
    }
}

fn parse_command(text: &str) -> Result<ClientCommand, serde_json::Error> {
    serde_json::from_str(text)
}

fn encode_event(event: &ServerEvent) -> Option<Utf8Bytes> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text.into()),
        Err(e) => {
            error!("Failed to serialize outbound event: {}", e);
            None
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
