use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use rally_gateway::{Dispatcher, handle_connection};
use rally_types::api::{HealthResponse, InternalEventRequest, InternalEventResponse};
use rally_types::events::ServerEvent;

const INTERNAL_KEY_HEADER: &str = "x-internal-key";

#[derive(Clone)]
pub struct ServerState {
    pub dispatcher: Dispatcher,
    pub internal_key: Option<Arc<str>>,
}

pub fn router(state: ServerState) -> Router {
    let mut app = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health));

    if state.internal_key.is_some() {
        let internal = Router::new()
            .route("/internal/events/{event_id}/broadcast", post(broadcast_to_event))
            .route("/internal/users/{user_id}/push", post(push_to_user))
            .layer(middleware::from_fn_with_state(state.clone(), require_internal_key));
        app = app.merge(internal);
    }

    app.with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// Authenticates before upgrading, so a rejected credential never opens a
/// socket or touches the registry.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(params): Query<GatewayParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = bearer_token(&headers).or(params.token).unwrap_or_default();

    let identity = match state.dispatcher.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejected gateway connection: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    match ws {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_connection(socket, state.dispatcher, identity))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.dispatcher.connection_count().await,
    })
}

async fn require_internal_key(
    State(state): State<ServerState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = req
        .headers()
        .get(INTERNAL_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    match state.internal_key.as_deref() {
        Some(expected) if expected == presented => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn broadcast_to_event(
    State(state): State<ServerState>,
    Path(event_id): Path<Uuid>,
    Json(body): Json<InternalEventRequest>,
) -> Json<InternalEventResponse> {
    let event = ServerEvent::EventUpdate {
        event_id,
        name: body.name,
        data: body.data,
    };
    let delivered = state.dispatcher.broadcast_to_event_channel(event_id, event).await;
    Json(InternalEventResponse { delivered })
}

async fn push_to_user(
    State(state): State<ServerState>,
    Path(user_id): Path<Uuid>,
    Json(body): Json<InternalEventRequest>,
) -> Json<InternalEventResponse> {
    let event = ServerEvent::Notification {
        name: body.name,
        data: body.data,
    };
    let delivered = state.dispatcher.push_to_user(user_id, event).await;
    Json(InternalEventResponse { delivered })
}
