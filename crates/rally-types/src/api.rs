use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// Claims of the connection credential. Issued by the REST layer, verified by
/// the gateway at WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Internal collaborator hooks --

/// Body of `POST /internal/events/{event_id}/broadcast` and
/// `POST /internal/users/{user_id}/push`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InternalEventRequest {
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct InternalEventResponse {
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
}
