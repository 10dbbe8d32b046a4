use uuid::Uuid;

use rally_types::models::{ChannelKind, ChannelTarget};

use crate::error::GatewayError;

/// Build a target from the loose `{type?, eventId?, receiverId?}` payload
/// fields. Exactly one id must be present, and it must agree with `type`.
pub fn resolve_target(
    kind: Option<ChannelKind>,
    event_id: Option<Uuid>,
    receiver_id: Option<Uuid>,
) -> Result<ChannelTarget, GatewayError> {
    let target = match (event_id, receiver_id) {
        (Some(event_id), None) => ChannelTarget::Event(event_id),
        (None, Some(receiver_id)) => ChannelTarget::Direct(receiver_id),
        (Some(_), Some(_)) => {
            return Err(GatewayError::validation("Specify either eventId or receiverId, not both"));
        }
        (None, None) => return Err(GatewayError::validation("Either eventId or receiverId is required")),
    };

    match kind {
        Some(kind) if kind != target.kind() => Err(GatewayError::validation(
            "Message type does not match the channel target",
        )),
        _ => Ok(target),
    }
}

/// Trimmed content, or a validation error.
pub fn validate_content(content: &str, max_length: usize) -> Result<String, GatewayError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::validation("Message content cannot be empty"));
    }
    if trimmed.chars().count() > max_length {
        return Err(GatewayError::Validation(format!(
            "Message content exceeds {} characters",
            max_length
        )));
    }
    Ok(trimmed.to_string())
}
